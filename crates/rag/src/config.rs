use std::path::PathBuf;

use rxdose_core::{Result, RxError};
use rxdose_llm::{GatewaySettings, LlmProvider, SupportedModel};

use crate::embedding::EmbeddingSettings;

pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const DEFAULT_RETRIEVAL_K: usize = 3;
pub const DEFAULT_INDEX_DIR: &str = "./rxdose_index";

/// Batch size and retrieval depth of one run. Only obtainable through
/// [`ExtractionSettings::new`], so both are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSettings {
    chunk_size: usize,
    retrieval_k: usize,
}

impl ExtractionSettings {
    pub fn new(chunk_size: usize, retrieval_k: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RxError::InvalidChunkSize(chunk_size));
        }
        if retrieval_k == 0 {
            return Err(RxError::InvalidRetrievalK(retrieval_k));
        }
        Ok(Self {
            chunk_size,
            retrieval_k,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn retrieval_k(&self) -> usize {
        self.retrieval_k
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retrieval_k: DEFAULT_RETRIEVAL_K,
        }
    }
}

/// Everything needed to stand up a pipeline against real backends.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub model: SupportedModel,
    pub provider: LlmProvider,
    pub gateway: GatewaySettings,
    pub embedding: EmbeddingSettings,
    pub index_dir: PathBuf,
    pub settings: ExtractionSettings,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: SupportedModel::default(),
            provider: LlmProvider::default(),
            gateway: GatewaySettings::default(),
            embedding: EmbeddingSettings::default(),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            settings: ExtractionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fail_fast() {
        assert!(matches!(
            ExtractionSettings::new(0, 3),
            Err(RxError::InvalidChunkSize(0))
        ));
        assert!(matches!(
            ExtractionSettings::new(10, 0),
            Err(RxError::InvalidRetrievalK(0))
        ));
        let settings = ExtractionSettings::new(5, 2).unwrap();
        assert_eq!((settings.chunk_size(), settings.retrieval_k()), (5, 2));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ExtractionConfig::default();
        assert_eq!(config.settings.chunk_size(), 10);
        assert_eq!(config.settings.retrieval_k(), 3);
        assert_eq!(config.model.as_str(), "qwen3:14b");
        assert_eq!(config.index_dir, PathBuf::from("./rxdose_index"));
    }
}
