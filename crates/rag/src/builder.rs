use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rxdose_core::{ReferenceRecord, RxError, TableRows, REFERENCE_COLUMNS};
use tracing::{info, warn};

use crate::embedding::{EmbeddingClient, EmbeddingIdentity};
use crate::store::{IndexEntry, SimilarityIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RecordSet {
    pub records: Vec<ReferenceRecord>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug)]
pub struct BuildReport {
    pub dir: PathBuf,
    pub embedding: EmbeddingIdentity,
    pub records: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Turns every table row into a [`ReferenceRecord`]. A row that fails is
/// logged and skipped; it never stops the rest.
pub fn collect_records(table: TableRows) -> RecordSet {
    let TableRows { headers, rows } = table;
    let missing = REFERENCE_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header.as_str() == **column))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        warn!(
            missing = %missing.join(","),
            available = %headers.join(","),
            "reference table lacks expected columns; they will read as empty"
        );
    }
    let mut set = RecordSet::default();
    for (row_id, row) in rows.into_iter().enumerate() {
        let outcome = row.and_then(|values| ReferenceRecord::from_row(row_id, &headers, &values));
        match outcome {
            Ok(record) => set.records.push(record),
            Err(err) => {
                warn!(row = row_id, error = %err, "skipping reference row");
                set.skipped.push(SkippedRow {
                    row: row_id,
                    reason: err.to_string(),
                });
            }
        }
    }
    set
}

pub fn build_index(
    reference: &Path,
    dir: &Path,
    embeddings: &EmbeddingClient,
) -> Result<BuildReport> {
    let table = TableRows::read_path(reference)
        .with_context(|| format!("failed to load reference data from {}", reference.display()))?;
    info!(
        path = %reference.display(),
        rows = table.rows.len(),
        "loaded reference data"
    );
    build_index_from_table(table, dir, embeddings)
}

/// Embeds all valid records in one pass and persists them at `dir`,
/// replacing any previous index. Fails only when no row survives.
pub fn build_index_from_table(
    table: TableRows,
    dir: &Path,
    embeddings: &EmbeddingClient,
) -> Result<BuildReport> {
    let RecordSet { records, skipped } = collect_records(table);
    info!(valid = records.len(), skipped = skipped.len(), "processed reference rows");
    if records.is_empty() {
        return Err(RxError::NoValidDocuments.into());
    }
    let texts = records
        .iter()
        .map(|record| record.text.clone())
        .collect::<Vec<_>>();
    let vectors = embeddings
        .embed_batch(&texts)
        .context("failed to embed reference records")?;
    if vectors.len() != records.len() {
        return Err(anyhow!(
            "embedding backend returned mismatched vector count"
        ));
    }
    let entries = records
        .into_iter()
        .zip(vectors)
        .map(|(record, embedding)| IndexEntry { record, embedding })
        .collect::<Vec<_>>();
    let identity = embeddings.identity();
    let index = SimilarityIndex::create(dir, identity.clone(), &entries)?;
    info!(
        path = %index.dir().display(),
        records = entries.len(),
        embedding = %identity,
        "similarity index created"
    );
    Ok(BuildReport {
        dir: dir.to_path_buf(),
        embedding: identity,
        records: entries.len(),
        skipped,
    })
}
