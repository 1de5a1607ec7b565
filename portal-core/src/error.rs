//! Error types for portal-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.portal/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// Two providers share an id.
    #[error("duplicate provider id '{id}'")]
    DuplicateProvider { id: String },

    /// Two providers resolve to the same location key and would delete each other's entities.
    #[error("providers '{first}' and '{second}' share location key '{location_key}'")]
    DuplicateLocationKey {
        location_key: String,
        first: String,
        second: String,
    },

    /// A provider schedule with a zero frequency or timeout.
    #[error("provider '{id}' has an invalid schedule: {reason}")]
    InvalidSchedule { id: String, reason: String },

    /// `{ env: NAME }` secret whose variable is unset.
    #[error("environment variable {name} is not set")]
    MissingSecret { name: String },

    /// Lookup of a provider id that is not configured.
    #[error("unknown provider '{id}'")]
    UnknownProvider { id: String },
}
