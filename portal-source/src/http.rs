//! JSON-over-HTTP remote source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use portal_core::config::SourceConfig;

use crate::auth::{Authenticator, RetryPolicy};
use crate::error::SourceError;
use crate::RemoteSource;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches one JSON document per pass and returns the selected item array.
#[derive(Debug, Clone)]
pub struct HttpSource {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    url: String,
    items_pointer: Option<String>,
    auth: Authenticator,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Self::with_options(config, DEFAULT_REQUEST_TIMEOUT, RetryPolicy::default())
    }

    pub fn with_options(
        config: &SourceConfig,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let agent = ureq::AgentBuilder::new().timeout(request_timeout).build();
        Ok(Self {
            inner: Arc::new(Inner {
                url: config.url.clone(),
                items_pointer: config.items_pointer.clone(),
                auth: Authenticator::from_config(&config.auth, retry)?,
                agent,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

impl Inner {
    fn fetch_blocking(&self) -> Result<Vec<Value>, SourceError> {
        let document = match self.get_document() {
            // A cached token may have been revoked early; renew once.
            Err(SourceError::Status { status: 401, .. })
                if matches!(self.auth, Authenticator::ClientCredentials(_)) =>
            {
                self.auth.invalidate();
                self.get_document()?
            }
            other => other?,
        };
        select_items(document, self.items_pointer.as_deref())
    }

    fn get_document(&self) -> Result<Value, SourceError> {
        let mut request = self.agent.get(&self.url).set("Accept", "application/json");
        if let Some(authorization) = self.auth.authorization(&self.agent)? {
            request = request.set("Authorization", &authorization);
        }
        let response = request
            .call()
            .map_err(|e| SourceError::from_ureq(&self.url, e))?;
        response.into_json().map_err(|source| SourceError::Decode {
            url: self.url.clone(),
            source,
        })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<Value>, SourceError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.fetch_blocking())
            .await
            .map_err(|e| SourceError::Join(e.to_string()))?
    }

    fn describe(&self) -> String {
        self.inner.url.clone()
    }
}

/// Pick the item array out of `document`.
///
/// `pointer` is an RFC 6901 JSON pointer (`/value`, `/data/items`); `None`
/// selects the document root.
pub fn select_items(document: Value, pointer: Option<&str>) -> Result<Vec<Value>, SourceError> {
    let selected = match pointer {
        None | Some("") => document,
        Some(pointer) => {
            let mut document = document;
            document
                .pointer_mut(pointer)
                .map(Value::take)
                .ok_or_else(|| SourceError::Malformed {
                    reason: format!("nothing at items pointer '{pointer}'"),
                })?
        }
    };
    match selected {
        Value::Array(items) => Ok(items),
        other => Err(SourceError::Malformed {
            reason: format!("expected an array of items, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_array_selected_without_pointer() {
        let items = select_items(json!([{"id": 1}, {"id": 2}]), None).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn pointer_selects_nested_array() {
        let doc = json!({"count": 1, "value": [{"id": "a"}]});
        let items = select_items(doc, Some("/value")).unwrap();
        assert_eq!(items, vec![json!({"id": "a"})]);
    }

    #[test]
    fn empty_array_is_not_an_error() {
        assert!(select_items(json!({"value": []}), Some("/value")).unwrap().is_empty());
    }

    #[test]
    fn missing_pointer_target_is_malformed() {
        let err = select_items(json!({"data": []}), Some("/value")).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }), "got: {err}");
    }

    #[test]
    fn non_array_selection_is_malformed() {
        let err = select_items(json!({"value": {"id": 1}}), Some("/value")).unwrap_err();
        assert!(err.to_string().contains("an object"), "got: {err}");
    }
}
