//! Provider status signal.
//!
//! Signal precedence:
//! 1. `NeverSynced` (no history, or no successful pass and no recorded error)
//! 2. `Failing` (the last attempt failed)
//! 3. `Stale` (no success within two schedule periods)
//! 4. `Current`

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use portal_core::config::ProviderConfig;

use crate::history::{self, ProviderHistory};
use crate::SyncError;

/// Health classification for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    NeverSynced,
    Current,
    Stale { reason: String },
    Failing { error: String },
}

impl ProviderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderStatus::NeverSynced => "never synced",
            ProviderStatus::Current => "current",
            ProviderStatus::Stale { .. } => "stale",
            ProviderStatus::Failing { .. } => "failing",
        }
    }
}

/// Classify a provider from its history. Pure.
pub fn classify(
    history: Option<&ProviderHistory>,
    frequency: Duration,
    now: DateTime<Utc>,
) -> ProviderStatus {
    let Some(history) = history else {
        return ProviderStatus::NeverSynced;
    };
    if let Some(error) = &history.last_error {
        return ProviderStatus::Failing {
            error: error.clone(),
        };
    }
    let Some(last_success) = history.last_success_at else {
        return ProviderStatus::NeverSynced;
    };

    let age = now.signed_duration_since(last_success).num_seconds().max(0) as u64;
    let allowed = frequency.as_secs().saturating_mul(2);
    if age > allowed {
        return ProviderStatus::Stale {
            reason: format!(
                "last success {} ago (expected every {})",
                format_seconds(age),
                format_seconds(frequency.as_secs())
            ),
        };
    }
    ProviderStatus::Current
}

/// Check a configured provider against its on-disk history.
pub fn check_at(
    home: &Path,
    provider: &ProviderConfig,
    now: DateTime<Utc>,
) -> Result<(ProviderStatus, Option<ProviderHistory>), SyncError> {
    let history = history::load_at(home, &provider.id)?;
    let status = classify(history.as_ref(), provider.schedule.frequency(), now);
    Ok((status, history))
}

/// Format age from a chrono timestamp.
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let now = Utc::now();
    let age = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const HOURLY: Duration = Duration::from_secs(3600);

    fn succeeded(at: DateTime<Utc>) -> ProviderHistory {
        ProviderHistory {
            last_attempt_at: Some(at),
            last_success_at: Some(at),
            ..ProviderHistory::default()
        }
    }

    #[test]
    fn never_synced_without_history() {
        assert_eq!(classify(None, HOURLY, Utc::now()), ProviderStatus::NeverSynced);
    }

    #[test]
    fn current_within_two_periods() {
        let now = Utc::now();
        let history = succeeded(now - ChronoDuration::minutes(90));
        assert_eq!(classify(Some(&history), HOURLY, now), ProviderStatus::Current);
    }

    #[test]
    fn stale_after_two_periods() {
        let now = Utc::now();
        let history = succeeded(now - ChronoDuration::hours(3));
        match classify(Some(&history), HOURLY, now) {
            ProviderStatus::Stale { reason } => assert!(reason.contains("3h"), "{reason}"),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn failing_takes_precedence_over_stale() {
        let now = Utc::now();
        let history = ProviderHistory {
            last_error: Some("fetch failed: 503".to_string()),
            ..succeeded(now - ChronoDuration::days(2))
        };
        assert_eq!(
            classify(Some(&history), HOURLY, now),
            ProviderStatus::Failing {
                error: "fetch failed: 503".to_string()
            }
        );
    }

    #[test]
    fn failing_before_any_success() {
        let history = ProviderHistory {
            last_attempt_at: Some(Utc::now()),
            last_error: Some("boom".to_string()),
            ..ProviderHistory::default()
        };
        assert_eq!(classify(Some(&history), HOURLY, Utc::now()).label(), "failing");
    }

    #[test]
    fn datetime_age_is_compact() {
        assert_eq!(format_datetime_age(Utc::now()), "0s");
        assert_eq!(format_seconds(65), "1m");
        assert_eq!(format_seconds(2 * 86_400), "2d");
    }
}
