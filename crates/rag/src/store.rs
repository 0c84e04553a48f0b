use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bytemuck::allocation::pod_collect_to_vec;
use bytemuck::cast_slice;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use rxdose_core::{cosine_similarity, ReferenceRecord, RxError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedding::EmbeddingIdentity;

const DB_FILE: &str = "index.sqlite";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding: EmbeddingIdentity,
    pub dimensions: usize,
    pub records: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub record: ReferenceRecord,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: ReferenceRecord,
    pub score: f32,
}

/// Directory-backed nearest-neighbour store: `index.sqlite` holds the records
/// and their vectors, `manifest.json` the embedding identity they share.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dir: PathBuf,
    manifest: IndexManifest,
}

impl SimilarityIndex {
    /// Writes a fresh index. Whatever already lives at `dir` is deleted first;
    /// there is no merge with a previous build.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        embedding: EmbeddingIdentity,
        entries: &[IndexEntry],
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
            return Err(anyhow!(
                "embedding for row {} has {} dimensions, expected {}",
                bad.record.row_id,
                bad.embedding.len(),
                dimensions
            ));
        }
        if dir.exists() {
            if !holds_index_or_nothing(&dir)? {
                return Err(RxError::NotAnIndexDirectory(dir).into());
            }
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
            info!(path = %dir.display(), "removed existing similarity index");
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut conn = Connection::open(dir.join(DB_FILE))?;
        conn.execute_batch(
            r#"
            CREATE TABLE records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                row_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )?;
        let tx = conn.transaction()?;
        for entry in entries {
            let metadata = serde_json::to_string(&entry.record)?;
            tx.execute(
                "INSERT INTO records (row_id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.record.row_id as i64,
                    entry.record.text,
                    metadata,
                    cast_slice::<f32, u8>(&entry.embedding),
                ],
            )?;
        }
        tx.commit()?;

        let manifest = IndexManifest {
            embedding,
            dimensions,
            records: entries.len(),
            built_at: Utc::now(),
        };
        let mut writer = BufWriter::new(File::create(dir.join(MANIFEST_FILE))?);
        serde_json::to_writer_pretty(&mut writer, &manifest)?;
        writer.flush()?;
        Ok(Self { dir, manifest })
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.join(DB_FILE).is_file() || !dir.join(MANIFEST_FILE).is_file() {
            return Err(RxError::IndexNotFound(dir).into());
        }
        let raw = fs::read_to_string(dir.join(MANIFEST_FILE))
            .with_context(|| format!("failed to read manifest in {}", dir.display()))?;
        let manifest: IndexManifest =
            serde_json::from_str(&raw).context("invalid index manifest")?;
        Ok(Self { dir, manifest })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            self.dir.join(DB_FILE),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Exhaustive cosine scan; best match first, at most `top_k` hits.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT metadata, embedding FROM records ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let metadata: String = row.get(0)?;
            let embedding_blob: Vec<u8> = row.get(1)?;
            let embedding = decode_embedding(&embedding_blob)?;
            if embedding.len() != query_embedding.len() {
                return Err(anyhow!(
                    "query has {} dimensions but the index stores {}",
                    query_embedding.len(),
                    embedding.len()
                ));
            }
            let record: ReferenceRecord =
                serde_json::from_str(&metadata).context("invalid record metadata")?;
            hits.push(ScoredRecord {
                score: cosine_similarity(query_embedding, &embedding),
                record,
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Only a previous index, or an empty directory, may be deleted by a rebuild.
fn holds_index_or_nothing(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    if dir.join(DB_FILE).exists() || dir.join(MANIFEST_FILE).exists() {
        return Ok(true);
    }
    let mut entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    Ok(entries.next().is_none())
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % std::mem::size_of::<f32>() != 0 {
        return Err(anyhow!("invalid embedding"));
    }
    Ok(pod_collect_to_vec::<u8, f32>(blob))
}
