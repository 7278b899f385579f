//! Error types for coderag-index.

use std::num::TryFromIntError;

use coderag_llm::LlmError;

/// Errors that can occur while chunking, indexing or searching.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` error outside a file write (open, migrate, query).
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tree-sitter could not produce an error-free tree.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Embedding failed after retries.
    #[error("embedding failed: {0}")]
    Embedding(#[source] LlmError),

    /// The reranker failed; search falls back to vector order.
    #[error("reranker failed: {0}")]
    RerankingUnavailable(#[source] LlmError),

    /// Writing a file's chunk set failed; the previous set is left intact.
    #[error("index write failed: {0}")]
    IndexWrite(#[source] sqlx::Error),

    /// Vector length differs from the dimension recorded by the index.
    #[error("embedding dimension mismatch: index has {expected}, got {actual}; re-index required")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Fatal errors invalidate the whole index and abort an indexing run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}

impl From<LlmError> for IndexError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Embedding(other),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
