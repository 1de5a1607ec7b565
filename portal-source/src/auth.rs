//! Request authentication for remote sources.
//!
//! - bearer: static `Authorization: Bearer <token>`
//! - basic: `Authorization: Basic base64(user:password)`
//! - client credentials: the token endpoint is discovered from
//!   `<issuer>/.well-known/openid-configuration` (retried, discovery only),
//!   then a `client_credentials` form grant is posted. The access token is
//!   cached until shortly before it expires.
//!
//! Everything here is blocking; callers run it on a blocking thread.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use portal_core::config::AuthConfig;

use crate::error::SourceError;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
/// Tokens are renewed this long before they expire.
const EXPIRY_SLACK: Duration = Duration::from_secs(30);
/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` are used up.
///
/// Returns the last error together with the number of attempts made.
pub fn with_retries<T, E, F>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err((err, attempt)),
            Err(err) => {
                tracing::warn!(%label, attempt, attempts, error = %err, "attempt failed, retrying");
                thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Resolved credentials for one source.
pub enum Authenticator {
    None,
    Header(String),
    ClientCredentials(ClientCredentials),
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authenticator::None => f.write_str("None"),
            Authenticator::Header(_) => f.write_str("Header(<redacted>)"),
            Authenticator::ClientCredentials(cc) => f
                .debug_struct("ClientCredentials")
                .field("issuer", &cc.issuer)
                .field("client_id", &cc.client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Authenticator {
    /// Resolve secrets from `config`. Missing `{ env }` secrets fail here, before any request.
    pub fn from_config(config: &AuthConfig, retry: RetryPolicy) -> Result<Self, SourceError> {
        Ok(match config {
            AuthConfig::None => Authenticator::None,
            AuthConfig::Bearer { token } => {
                Authenticator::Header(format!("Bearer {}", token.resolve()?))
            }
            AuthConfig::Basic { username, password } => {
                Authenticator::Header(basic_header(username, &password.resolve()?))
            }
            AuthConfig::ClientCredentials {
                issuer,
                client_id,
                client_secret,
                scope,
            } => Authenticator::ClientCredentials(ClientCredentials {
                issuer: issuer.trim_end_matches('/').to_string(),
                client_id: client_id.clone(),
                client_secret: client_secret.resolve()?,
                scope: scope.clone(),
                retry,
                cached: Mutex::new(None),
            }),
        })
    }

    /// Value for the `Authorization` header, if any.
    pub fn authorization(&self, agent: &ureq::Agent) -> Result<Option<String>, SourceError> {
        match self {
            Authenticator::None => Ok(None),
            Authenticator::Header(value) => Ok(Some(value.clone())),
            Authenticator::ClientCredentials(cc) => {
                Ok(Some(format!("Bearer {}", cc.access_token(agent)?)))
            }
        }
    }

    /// Forget any cached token (e.g. after the remote answered 401).
    pub fn invalidate(&self) {
        if let Authenticator::ClientCredentials(cc) = self {
            *cc.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }
}

pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

// ---------------------------------------------------------------------------
// Client credentials
// ---------------------------------------------------------------------------

pub struct ClientCredentials {
    issuer: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    retry: RetryPolicy,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl ClientCredentials {
    fn access_token(&self, agent: &ureq::Agent) -> Result<String, SourceError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_SLACK < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let endpoint = self.discover(agent)?;
        let token = self.grant(agent, &endpoint)?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn discover(&self, agent: &ureq::Agent) -> Result<String, SourceError> {
        let url = format!("{}{DISCOVERY_PATH}", self.issuer);
        with_retries(self.retry, "oidc discovery", |_| {
            let response = agent
                .get(&url)
                .call()
                .map_err(|e| SourceError::from_ureq(&url, e))?;
            let document: DiscoveryDocument =
                response.into_json().map_err(|source| SourceError::Decode {
                    url: url.clone(),
                    source,
                })?;
            Ok(document.token_endpoint)
        })
        .map_err(|(err, attempts): (SourceError, u32)| SourceError::Discovery {
            issuer: self.issuer.clone(),
            attempts,
            message: err.to_string(),
        })
    }

    fn grant(&self, agent: &ureq::Agent, endpoint: &str) -> Result<CachedToken, SourceError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = agent.post(endpoint).send_form(&form).map_err(|err| match err {
            ureq::Error::Status(status, _) => {
                SourceError::Auth(format!("token endpoint answered HTTP {status}"))
            }
            other => SourceError::from_ureq(endpoint, other),
        })?;
        let token: TokenResponse = response.into_json().map_err(|source| SourceError::Decode {
            url: endpoint.to_string(),
            source,
        })?;
        if token.access_token.is_empty() {
            return Err(SourceError::Auth("token endpoint returned an empty access token".into()));
        }

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::debug!(client_id = %self.client_id, lifetime_secs = lifetime.as_secs(), "obtained access token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::config::Secret;
    use std::cell::Cell;

    const NO_WAIT: RetryPolicy = RetryPolicy {
        attempts: 3,
        backoff: Duration::ZERO,
    };

    #[test]
    fn basic_header_is_base64_user_colon_password() {
        assert_eq!(basic_header("aladdin", "opensesame"), "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
    }

    #[test]
    fn bearer_resolves_literal_token() {
        let auth = Authenticator::from_config(
            &AuthConfig::Bearer {
                token: Secret::Literal("t0k".to_string()),
            },
            NO_WAIT,
        )
        .unwrap();
        let agent = ureq::Agent::new();
        assert_eq!(auth.authorization(&agent).unwrap().as_deref(), Some("Bearer t0k"));
    }

    #[test]
    fn missing_env_secret_fails_before_any_request() {
        let err = Authenticator::from_config(
            &AuthConfig::Bearer {
                token: Secret::Env {
                    env: "PORTAL_TEST_DEFINITELY_UNSET_TOKEN".to_string(),
                },
            },
            NO_WAIT,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Config(_)), "got: {err}");
    }

    #[test]
    fn retries_stop_at_first_success() {
        let calls = Cell::new(0);
        let result: Result<u32, (String, u32)> = with_retries(NO_WAIT, "t", |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 2 {
                Err("boom".to_string())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), (String, u32)> = with_retries(NO_WAIT, "t", |_| {
            calls.set(calls.get() + 1);
            Err("down".to_string())
        });
        let (err, attempts) = result.unwrap_err();
        assert_eq!(err, "down");
        assert_eq!(attempts, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn debug_redacts_secrets() {
        let auth = Authenticator::Header("Bearer secret".to_string());
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
