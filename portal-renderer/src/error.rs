//! Error types for portal-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from entity template rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    /// No template registered under the requested name.
    #[error("unknown entity template '{name}'")]
    UnknownTemplate { name: String },

    /// Rendered output is not valid YAML.
    #[error("template '{template}' rendered invalid YAML: {source}")]
    Yaml {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Rendered output parsed, but not into a mapping.
    #[error("template '{template}' did not render a mapping")]
    NotAMapping { template: String },
}
