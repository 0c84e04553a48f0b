use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("chunk size must be at least 1 (got {0})")]
    InvalidChunkSize(usize),
    #[error("retrieval k must be at least 1 (got {0})")]
    InvalidRetrievalK(usize),
    #[error("no valid documents created; check the reference file structure")]
    NoValidDocuments,
    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("unsupported table format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("similarity index not found at {}; run build-index first", .0.display())]
    IndexNotFound(PathBuf),
    #[error("refusing to replace {}: not a similarity index directory", .0.display())]
    NotAnIndexDirectory(PathBuf),
    #[error("index was built with embedding {expected} but {found} is configured")]
    EmbeddingMismatch { expected: String, found: String },
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RxError>;
