use std::path::Path;

use anyhow::Result;
use rxdose_core::ReferenceRecord;
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::store::{ScoredRecord, SimilarityIndex};

pub const NO_REFERENCE_DATA: &str = "No reference data available";

/// Outcome of a lookup. `Unavailable` stands in for any failure so that
/// retrieval never aborts a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceExamples {
    Found(Vec<ReferenceRecord>),
    Unavailable,
}

impl ReferenceExamples {
    pub fn records(&self) -> &[ReferenceRecord] {
        match self {
            ReferenceExamples::Found(records) => records,
            ReferenceExamples::Unavailable => &[],
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ReferenceExamples::Unavailable)
    }
}

pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> ReferenceExamples;
}

/// Retrieval over a persisted [`SimilarityIndex`]. Every call re-embeds the
/// query; nothing is cached.
#[derive(Clone)]
pub struct IndexRetriever {
    index: SimilarityIndex,
    embeddings: EmbeddingClient,
}

impl IndexRetriever {
    /// Opens the index at `dir` and checks that `embeddings` is the function
    /// it was built with.
    pub fn open(dir: &Path, embeddings: EmbeddingClient) -> Result<Self> {
        let index = SimilarityIndex::open(dir)?;
        embeddings.ensure_identity(&index.manifest().embedding)?;
        Ok(Self { index, embeddings })
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        let query_embedding = self.embeddings.embed(query)?;
        self.index.search(&query_embedding, k)
    }
}

impl Retriever for IndexRetriever {
    fn retrieve(&self, query: &str, k: usize) -> ReferenceExamples {
        match self.search(query, k) {
            Ok(hits) if hits.is_empty() => {
                warn!(
                    index = %self.index.dir().display(),
                    "similarity search returned no examples"
                );
                ReferenceExamples::Unavailable
            }
            Ok(hits) => {
                ReferenceExamples::Found(hits.into_iter().map(|hit| hit.record).collect())
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "similarity search failed");
                ReferenceExamples::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexEntry;
    use rxdose_core::{HashEmbedderConfig, RxError};
    use std::fs;
    use tempfile::tempdir;

    fn record(row_id: usize, name: &str, instructions: &str) -> ReferenceRecord {
        ReferenceRecord {
            row_id,
            text: format!("Raw Antibiotic: {name} | Patient Instructions: {instructions}"),
            raw_antibiotic_name: name.to_string(),
            raw_dose_quantity: String::new(),
            patient_instructions: instructions.to_string(),
            clean_antibiotic_name: name.to_lowercase(),
            clean_dose: 0.0,
            clean_unit_of_measure: "mg".into(),
            clean_frequency: 0.0,
            clean_duration: 0.0,
        }
    }

    fn build(dir: &Path, embeddings: &EmbeddingClient, records: Vec<ReferenceRecord>) {
        let entries = records
            .into_iter()
            .map(|record| IndexEntry {
                embedding: embeddings.embed(&record.text).unwrap(),
                record,
            })
            .collect::<Vec<_>>();
        SimilarityIndex::create(dir, embeddings.identity(), &entries).unwrap();
    }

    #[test]
    fn nearest_records_come_first() {
        let dir = tempdir().unwrap();
        let embeddings = EmbeddingClient::hash(HashEmbedderConfig::default());
        build(
            dir.path(),
            &embeddings,
            vec![
                record(0, "Nitrofurantoin", "one at night"),
                record(1, "Amoxicillin", "500mg three times daily for seven days"),
                record(2, "Doxycycline", "100mg once daily"),
            ],
        );
        let retriever = IndexRetriever::open(dir.path(), embeddings).unwrap();
        let found = retriever.retrieve("amoxicillin 500mg three times daily", 2);
        let names = found
            .records()
            .iter()
            .map(|r| r.raw_antibiotic_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "Amoxicillin");
    }

    #[test]
    fn empty_index_degrades_to_sentinel() {
        let dir = tempdir().unwrap();
        let embeddings = EmbeddingClient::hash(HashEmbedderConfig::default());
        build(dir.path(), &embeddings, Vec::new());
        let retriever = IndexRetriever::open(dir.path(), embeddings).unwrap();
        assert_eq!(
            retriever.retrieve("anything", 3),
            ReferenceExamples::Unavailable
        );
    }

    #[test]
    fn corrupt_index_degrades_to_sentinel() {
        let dir = tempdir().unwrap();
        let embeddings = EmbeddingClient::hash(HashEmbedderConfig::default());
        build(dir.path(), &embeddings, vec![record(0, "Keflex", "qds")]);
        let retriever = IndexRetriever::open(dir.path(), embeddings).unwrap();
        fs::write(dir.path().join("index.sqlite"), b"not a database").unwrap();
        assert!(retriever.retrieve("keflex", 3).is_unavailable());
    }

    #[test]
    fn mismatched_embedding_is_rejected_at_open() {
        let dir = tempdir().unwrap();
        let builder = EmbeddingClient::hash(HashEmbedderConfig {
            dimensions: 16,
            seed: 1,
        });
        build(dir.path(), &builder, vec![record(0, "Keflex", "qds")]);
        let other = EmbeddingClient::hash(HashEmbedderConfig::default());
        let err = IndexRetriever::open(dir.path(), other).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<RxError>(),
            Some(RxError::EmbeddingMismatch { .. })
        ));
    }
}
