use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use rxdose_core::{HashEmbedderConfig, RxError};
use rxdose_rag::{
    EmbeddingProvider, EmbeddingSettings, ExtractionConfig, ExtractionSettings, GatewaySettings,
    LlmProvider, SupportedModel, DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_MODEL, DEFAULT_INDEX_DIR,
    DEFAULT_RETRIEVAL_K,
};
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "rxdose.toml";

/// `rxdose.toml`. Every key is optional; absent keys fall through to the
/// built-in defaults.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    model: Option<String>,
    chunk_size: Option<usize>,
    index_dir: Option<PathBuf>,
    retrieval_k: Option<usize>,
    provider: Option<String>,
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    embedding: EmbeddingSection,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingSection {
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    dimensions: Option<usize>,
    seed: Option<u64>,
}

/// Command-line overrides, the highest-precedence layer.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigFlags {
    /// Model tag or its position in `rxdose models`
    #[arg(long, global = true)]
    pub model: Option<String>,
    #[arg(long = "chunk-size", global = true)]
    pub chunk_size: Option<usize>,
    #[arg(long = "index-dir", global = true)]
    pub index_dir: Option<PathBuf>,
    /// Reference examples retrieved per batch
    #[arg(long = "retrieval-k", global = true)]
    pub retrieval_k: Option<usize>,
    /// ollama | local
    #[arg(long, global = true)]
    pub provider: Option<String>,
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,
    /// ollama | hash
    #[arg(long = "embedding-provider", global = true)]
    pub embedding_provider: Option<String>,
    #[arg(long = "timeout-secs", global = true)]
    pub timeout_secs: Option<u64>,
}

/// One source of settings. Layers are stacked with [`ConfigLayer::overlay`]
/// and resolved once at the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub model: Option<String>,
    pub chunk_size: Option<usize>,
    pub index_dir: Option<PathBuf>,
    pub retrieval_k: Option<usize>,
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_base_url: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub embedding_seed: Option<u64>,
}

impl ConfigLayer {
    /// Values present in `higher` win.
    pub fn overlay(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            model: higher.model.or(self.model),
            chunk_size: higher.chunk_size.or(self.chunk_size),
            index_dir: higher.index_dir.or(self.index_dir),
            retrieval_k: higher.retrieval_k.or(self.retrieval_k),
            provider: higher.provider.or(self.provider),
            base_url: higher.base_url.or(self.base_url),
            request_timeout_secs: higher.request_timeout_secs.or(self.request_timeout_secs),
            embedding_provider: higher.embedding_provider.or(self.embedding_provider),
            embedding_model: higher.embedding_model.or(self.embedding_model),
            embedding_base_url: higher.embedding_base_url.or(self.embedding_base_url),
            embedding_dimensions: higher.embedding_dimensions.or(self.embedding_dimensions),
            embedding_seed: higher.embedding_seed.or(self.embedding_seed),
        }
    }

    pub fn from_env<F>(lookup: F) -> Result<ConfigLayer>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Result<Option<usize>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<usize>()
                        .with_context(|| format!("{key} must be a non-negative integer"))
                })
                .transpose()
        };
        Ok(ConfigLayer {
            model: lookup("RXDOSE_MODEL"),
            chunk_size: number("RXDOSE_CHUNK_SIZE")?,
            index_dir: lookup("RXDOSE_INDEX_DIR").map(PathBuf::from),
            retrieval_k: number("RXDOSE_RETRIEVAL_K")?,
            provider: lookup("RXDOSE_PROVIDER"),
            base_url: lookup("RXDOSE_BASE_URL"),
            embedding_provider: lookup("RXDOSE_EMBEDDING_PROVIDER"),
            ..ConfigLayer::default()
        })
    }

    /// Resolves the stack into a validated configuration. Nothing is
    /// contacted here; bad values fail before any backend is built.
    pub fn resolve(self) -> Result<ExtractionConfig> {
        let model = match self.model.as_deref() {
            Some(value) => SupportedModel::parse(value)?,
            None => SupportedModel::default(),
        };
        let provider = match self.provider.as_deref() {
            Some(value) => LlmProvider::from_str(value)
                .ok_or_else(|| RxError::UnknownProvider(value.to_string()))?,
            None => LlmProvider::default(),
        };
        let embedding_provider = match self.embedding_provider.as_deref() {
            Some(value) => EmbeddingProvider::from_str(value)
                .ok_or_else(|| RxError::UnknownProvider(value.to_string()))?,
            None => EmbeddingProvider::default(),
        };
        let settings = ExtractionSettings::new(
            self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            self.retrieval_k.unwrap_or(DEFAULT_RETRIEVAL_K),
        )?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| GatewaySettings::default().base_url);
        let mut hash = HashEmbedderConfig::default();
        if let Some(dimensions) = self.embedding_dimensions {
            if dimensions == 0 {
                return Err(anyhow!("embedding dimensions must be at least 1"));
            }
            hash.dimensions = dimensions;
        }
        if let Some(seed) = self.embedding_seed {
            hash.seed = seed;
        }
        let embedding = EmbeddingSettings {
            provider: embedding_provider,
            model: self
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: self.embedding_base_url.unwrap_or_else(|| base_url.clone()),
            hash,
        };

        Ok(ExtractionConfig {
            model,
            provider,
            gateway: GatewaySettings {
                base_url,
                request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            },
            embedding,
            index_dir: self
                .index_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_DIR)),
            settings,
        })
    }
}

impl From<FileConfig> for ConfigLayer {
    fn from(file: FileConfig) -> Self {
        ConfigLayer {
            model: file.model,
            chunk_size: file.chunk_size,
            index_dir: file.index_dir,
            retrieval_k: file.retrieval_k,
            provider: file.provider,
            base_url: file.base_url,
            request_timeout_secs: file.request_timeout_secs,
            embedding_provider: file.embedding.provider,
            embedding_model: file.embedding.model,
            embedding_base_url: file.embedding.base_url,
            embedding_dimensions: file.embedding.dimensions,
            embedding_seed: file.embedding.seed,
        }
    }
}

impl From<&ConfigFlags> for ConfigLayer {
    fn from(flags: &ConfigFlags) -> Self {
        ConfigLayer {
            model: flags.model.clone(),
            chunk_size: flags.chunk_size,
            index_dir: flags.index_dir.clone(),
            retrieval_k: flags.retrieval_k,
            provider: flags.provider.clone(),
            base_url: flags.base_url.clone(),
            request_timeout_secs: flags.timeout_secs,
            embedding_provider: flags.embedding_provider.clone(),
            ..ConfigLayer::default()
        }
    }
}

/// A missing file is not an error: it means "defaults only".
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config {}: {e}", path.display()))
}

/// defaults -> file -> environment -> flags.
pub fn resolve_config(config_path: &Path, flags: &ConfigFlags) -> Result<ExtractionConfig> {
    let file = ConfigLayer::from(load_config(config_path)?);
    let env = ConfigLayer::from_env(|key| std::env::var(key).ok())?;
    file.overlay(env).overlay(ConfigLayer::from(flags)).resolve()
}
