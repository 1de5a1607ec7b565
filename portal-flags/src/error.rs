//! Error types for portal-flags.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to direct callers of store reads and writes.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored value or storage document could not be (de)serialized.
    #[error("storage JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport failed for a reason of its own.
    #[error("storage transport error: {0}")]
    Transport(String),
}

/// Convenience constructor for [`StorageError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.into(),
        source,
    }
}
