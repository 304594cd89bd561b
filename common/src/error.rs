use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors. Fatal load-time failures each get their own variant;
// recoverable degradations (malformed map lines, missing ordinal mappings)
// are logged and counted instead of surfaced here.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),
    #[error(
        "Dimension mismatch for corpus '{corpus}': index has {index_dimension}, manifest says {manifest_dimension}"
    )]
    DimensionMismatch {
        corpus: String,
        index_dimension: usize,
        manifest_dimension: usize,
    },
    #[error("Corpus '{corpus}' file '{file}' unavailable: {source}")]
    CorpusFile {
        corpus: String,
        file: String,
        #[source]
        source: object_store::Error,
    },
    #[error("Index format error: {0}")]
    IndexFormat(String),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Embedding error: {0}")]
    Embedding(#[from] anyhow::Error),
    #[error("Retriever not loaded")]
    NotLoaded,
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Internal service error: {0}")]
    Internal(String),
}
