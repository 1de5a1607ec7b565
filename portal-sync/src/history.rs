//! Provider history: last attempt/success bookkeeping per provider.
//!
//! Persists a `ProviderHistory` JSON document at
//! `<home>/.portal/state/<provider>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the config.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_core::types::ProviderId;

use crate::error::{io_err, SyncError};
use crate::mutation::MutationSummary;
use crate::reconciler::PassOutcome;

/// On-disk history payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderHistory {
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Error of the last attempt; cleared by the next success.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Entities owned after the last applied pass.
    #[serde(default)]
    pub entity_count: usize,
    #[serde(default)]
    pub last_outcome: Option<String>,
    #[serde(default)]
    pub last_summary: Option<MutationSummary>,
}

/// The part of a [`PassOutcome`] the history keeps, detached from the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassRecord {
    Applied(MutationSummary),
    SkippedEmpty,
    Failed(String),
}

impl PassRecord {
    /// `None` for dropped (busy) passes, which leave no trace.
    pub fn of(outcome: &PassOutcome) -> Option<Self> {
        match outcome {
            PassOutcome::Busy => None,
            PassOutcome::Applied(report) => Some(PassRecord::Applied(report.summary)),
            PassOutcome::SkippedEmpty => Some(PassRecord::SkippedEmpty),
            PassOutcome::Failed(err) => Some(PassRecord::Failed(err.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PassRecord::Applied(_) => "applied",
            PassRecord::SkippedEmpty => "skipped-empty",
            PassRecord::Failed(_) => "failed",
        }
    }
}

impl ProviderHistory {
    /// Fold one pass outcome into the history. Dropped (busy) passes are ignored.
    ///
    /// Returns `false` when nothing changed.
    pub fn record(&mut self, outcome: &PassOutcome, now: DateTime<Utc>) -> bool {
        match PassRecord::of(outcome) {
            Some(record) => {
                self.apply(&record, now);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, record: &PassRecord, now: DateTime<Utc>) {
        match record {
            PassRecord::Applied(summary) => {
                self.last_success_at = Some(now);
                self.last_error = None;
                self.entity_count = summary.owned();
                self.last_summary = Some(*summary);
            }
            PassRecord::SkippedEmpty => {
                // the remote answered; the catalog simply kept its state
                self.last_success_at = Some(now);
                self.last_error = None;
            }
            PassRecord::Failed(err) => {
                self.last_error = Some(err.clone());
            }
        }
        self.last_attempt_at = Some(now);
        self.last_outcome = Some(record.label().to_string());
    }
}

/// Path to the history JSON for a given provider, rooted at `home`.
///
/// `~/.portal/state/<provider>.json`
pub fn history_path_at(home: &Path, provider: &ProviderId) -> PathBuf {
    home.join(".portal")
        .join("state")
        .join(format!("{provider}.json"))
}

/// Load the history for `provider`; `None` if the provider never ran.
pub fn load_at(home: &Path, provider: &ProviderId) -> Result<Option<ProviderHistory>, SyncError> {
    let path = history_path_at(home, provider);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the history for `provider` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, provider: &ProviderId, history: &ProviderHistory) -> Result<(), SyncError> {
    let path = history_path_at(home, provider);
    let Some(dir) = path.parent() else {
        return Err(io_err(&path, std::io::Error::other("invalid history path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(history)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Load, fold `outcome` in, and save.
pub fn record_at(
    home: &Path,
    provider: &ProviderId,
    outcome: &PassOutcome,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    match PassRecord::of(outcome) {
        Some(record) => record_pass_at(home, provider, &record, now),
        None => Ok(()),
    }
}

fn record_pass_at(
    home: &Path,
    provider: &ProviderId,
    record: &PassRecord,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let mut history = load_at(home, provider)?.unwrap_or_default();
    history.apply(record, now);
    save_at(home, provider, &history)
}

/// [`record_at`] on the blocking pool, for callers running on an async worker.
///
/// Everything needed is captured up front, so the returned future is `'static`.
pub fn record_in_background(
    home: &Path,
    provider: &ProviderId,
    outcome: &PassOutcome,
    now: DateTime<Utc>,
) -> impl Future<Output = Result<(), SyncError>> + Send + 'static {
    let home = home.to_path_buf();
    let provider = provider.clone();
    let record = PassRecord::of(outcome);
    async move {
        let Some(record) = record else {
            return Ok(());
        };
        let path = history_path_at(&home, &provider);
        tokio::task::spawn_blocking(move || record_pass_at(&home, &provider, &record, now))
            .await
            .map_err(|e| io_err(path, e.into()))?
    }
}
