//! Error types for portal-sync.

use std::path::PathBuf;

use thiserror::Error;

use portal_core::ConfigError;
use portal_renderer::RenderError;
use portal_source::SourceError;

/// Failures of a target catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog document could not be (de)serialized.
    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The catalog could not be reached.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Why one reconciliation pass was abandoned.
///
/// Never escapes [`crate::Reconciler::refresh`]; it is carried inside
/// [`crate::PassOutcome::Failed`] so schedulers keep running.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// `refresh()` called before `connect()`.
    #[error("reconciler is not connected to a catalog")]
    NotInitialized,

    /// Fetch or authentication failure.
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    /// The catalog rejected the mutation.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Every fetched item failed validation or mapping.
    #[error("all {rejected} fetched records were rejected")]
    AllRecordsRejected { rejected: usize },
}

/// A single record that could not become an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("item {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("item {index} has no usable '{field}' identifier")]
    MissingId { index: usize, field: String },

    #[error("record '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: String },

    #[error("record '{id}' duplicates entity key '{key}'")]
    DuplicateKey { id: String, key: String },

    #[error("record '{id}' could not be mapped: {reason}")]
    Mapping { id: String, reason: String },
}

/// All errors that can arise from the CLI/daemon sync entrypoints.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Reconcile(#[from] ReconcileError),

    #[error("scheduling error: {0}")]
    Schedule(#[from] crate::schedule::ScheduleError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (provider history).
    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`CatalogError::Io`].
pub(crate) fn catalog_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.into(),
        source,
    }
}
