//! Error types for portal-source.

use thiserror::Error;

use portal_core::ConfigError;

/// Failures of a single fetch. All of them are fatal to the pass that saw them.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Secret resolution or other configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The remote answered with a non-success status.
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    /// Connection, DNS, TLS or timeout failure.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Body could not be decoded as JSON.
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON decoded, but does not have the expected shape.
    #[error("malformed payload: {reason}")]
    Malformed { reason: String },

    /// Token endpoint discovery failed on every attempt.
    #[error("OIDC discovery at {issuer} failed after {attempts} attempts: {message}")]
    Discovery {
        issuer: String,
        attempts: u32,
        message: String,
    },

    /// The token endpoint rejected the grant or returned no token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The blocking fetch task panicked or was cancelled.
    #[error("fetch task failed: {0}")]
    Join(String),
}

impl SourceError {
    pub(crate) fn from_ureq(url: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => SourceError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => SourceError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            },
        }
    }
}
