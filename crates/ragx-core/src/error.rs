//! Error taxonomy shared by the build and query paths.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, persisting, loading, or querying an index.
///
/// Structural errors are never recovered from. Numeric noise (NaN or
/// infinite components) is sanitized instead and never surfaces here.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Bad chunking, batching, or retrieval parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The embedding capability failed or returned an unusable response.
    #[error("embedding failed")]
    EmbeddingFailure(#[source] anyhow::Error),

    /// The metadata or vector file of an index directory is missing.
    #[error("index not found: {}", .0.display())]
    IndexNotFound(PathBuf),

    /// The persisted files are malformed or disagree with each other.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// A vector's dimension disagrees with the rest of the index.
    #[error("dimension mismatch: index has {expected} dims, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The index was built with a different embedding model.
    #[error("embedding model mismatch: index was built with '{index}', query uses '{configured}'")]
    ModelMismatch { index: String, configured: String },

    /// No chunk survived chunking, length filtering, and deduplication.
    #[error("empty corpus: no chunks survived filtering and deduplication")]
    EmptyCorpus,

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }
}
