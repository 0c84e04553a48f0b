use std::fmt;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use rxdose_core::{HashEmbedder, HashEmbedderConfig, RxError, HASH_ALGORITHM};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const HTTP_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    Hash,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::Ollama => "ollama",
            EmbeddingProvider::Hash => "hash",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ollama" => Some(EmbeddingProvider::Ollama),
            "hash" => Some(EmbeddingProvider::Hash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    pub hash: HashEmbedderConfig,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: rxdose_llm::DEFAULT_BASE_URL.to_string(),
            hash: HashEmbedderConfig::default(),
        }
    }
}

/// Which embedding function produced a vector. An index is only valid for
/// queries embedded with the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingIdentity {
    pub provider: String,
    pub model: String,
}

impl fmt::Display for EmbeddingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Http(HttpEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let backend = match settings.provider {
            EmbeddingProvider::Ollama => EmbeddingBackend::Http(HttpEmbeddingClient::new(
                &settings.base_url,
                &settings.model,
            )?),
            EmbeddingProvider::Hash => EmbeddingBackend::Hash(HashEmbedder::new(settings.hash)),
        };
        Ok(Self { backend })
    }

    pub fn hash(config: HashEmbedderConfig) -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(config)),
        }
    }

    pub fn identity(&self) -> EmbeddingIdentity {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => {
                let config = embedder.config();
                EmbeddingIdentity {
                    provider: EmbeddingProvider::Hash.as_str().to_string(),
                    model: format!("{HASH_ALGORITHM}-d{}-s{}", config.dimensions, config.seed),
                }
            }
            EmbeddingBackend::Http(client) => EmbeddingIdentity {
                provider: EmbeddingProvider::Ollama.as_str().to_string(),
                model: client.model.clone(),
            },
        }
    }

    /// Fails unless `expected` names this client's embedding function.
    pub fn ensure_identity(&self, expected: &EmbeddingIdentity) -> Result<()> {
        let found = self.identity();
        if &found != expected {
            return Err(RxError::EmbeddingMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::Http(client) => client.embed_batch(inputs),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs)?;
        output
            .pop()
            .ok_or_else(|| anyhow!("embedding backend returned no vector"))
    }
}

/// Talks to the OpenAI-compatible `/embeddings` route that Ollama serves.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(inputs.len());
        for group in inputs.chunks(HTTP_BATCH) {
            out.extend(self.embed_group(group)?);
        }
        Ok(out)
    }

    fn embed_group(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .with_context(|| format!("embedding request to {url} failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "embedding request failed: {}",
                response.status()
            ));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .context("failed to decode embedding response")?;
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        if data.len() != inputs.len() {
            return Err(anyhow!(
                "embedding backend returned {} vectors for {} inputs",
                data.len(),
                inputs.len()
            ));
        }
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
