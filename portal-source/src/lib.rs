//! # portal-source
//!
//! Remote sources of truth for entity providers.
//!
//! A source returns raw JSON items; turning them into typed records is the
//! reconciler's validation step, not the source's.

pub mod auth;
pub mod error;
pub mod http;

use async_trait::async_trait;
use serde_json::Value;

pub use auth::{with_retries, Authenticator, RetryPolicy};
pub use error::SourceError;
pub use http::{select_items, HttpSource};

/// Something a reconciler can fetch the full current item list from.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch every item. An empty list is a valid answer.
    async fn fetch(&self) -> Result<Vec<Value>, SourceError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String {
        "remote source".to_string()
    }
}
