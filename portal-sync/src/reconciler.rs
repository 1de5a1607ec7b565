//! The reconciler: converge one provider's slice of the catalog with its remote.
//!
//! ## Pass protocol
//!
//! 1. Require a connected catalog (`NotInitialized` otherwise, no mutation).
//! 2. Fetch every raw item from the remote source.
//! 3. Zero items: apply the provider's empty-fetch policy (skip by default).
//! 4. Validate each item into a `RemoteRecord`; rejects are skipped with a warning.
//! 5. Map each record to one entity; failures and duplicate keys are skipped.
//! 6. Nothing survived: abandon the pass, no mutation.
//! 7. Apply one full mutation scoped to the provider's location key.
//! 8. Optionally request a refresh for every key the provider now owns.
//!
//! A pass that starts while another is running is dropped with a log line.
//! Nothing inside a pass escapes as an error: the result is a [`PassOutcome`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use portal_core::config::EmptyFetchPolicy;
use portal_core::types::{DerivedEntity, EntityMutation, LocationKey, ProviderId};
use portal_source::RemoteSource;

use crate::catalog::CatalogConnection;
use crate::error::{RecordRejection, ReconcileError};
use crate::mapper::EntityMapper;
use crate::mutation::{MutationPlan, MutationSummary};
use crate::validate::RecordSchema;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    Uninitialized,
    Connected,
    Refreshing,
}

/// Per-provider behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub empty_fetch: EmptyFetchPolicy,
    pub refresh_after_apply: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            empty_fetch: EmptyFetchPolicy::Skip,
            refresh_after_apply: true,
        }
    }
}

/// Entities computed from one fetch, before anything is applied.
#[derive(Debug, Clone)]
pub struct PreparedPass {
    pub fetched: usize,
    pub entities: Vec<DerivedEntity>,
    pub rejected: Vec<RecordRejection>,
}

impl PreparedPass {
    pub fn into_mutation(self, location_key: LocationKey) -> EntityMutation {
        EntityMutation::Full {
            location_key,
            entities: self.entities,
        }
    }
}

/// Report of an applied pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub provider: ProviderId,
    pub fetched: usize,
    pub rejected: usize,
    pub summary: MutationSummary,
    pub refreshed: usize,
    pub duration_ms: u64,
}

/// Result of one `refresh()` call.
#[derive(Debug)]
pub enum PassOutcome {
    /// One full mutation was applied.
    Applied(PassReport),
    /// The remote returned no items and the policy left the catalog untouched.
    SkippedEmpty,
    /// Another pass was already running; this one was dropped.
    Busy,
    /// The pass was abandoned without mutation.
    Failed(ReconcileError),
}

impl PassOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PassOutcome::Applied(_) => "applied",
            PassOutcome::SkippedEmpty => "skipped-empty",
            PassOutcome::Busy => "busy",
            PassOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PassOutcome::Failed(_))
    }
}

pub struct Reconciler {
    provider: ProviderId,
    location_key: LocationKey,
    source: Arc<dyn RemoteSource>,
    schema: RecordSchema,
    mapper: Arc<dyn EntityMapper>,
    options: ReconcileOptions,
    connection: RwLock<Option<Arc<dyn CatalogConnection>>>,
    busy: AtomicBool,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("provider", &self.provider)
            .field("location_key", &self.location_key)
            .field("options", &self.options)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the busy flag when the pass ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        provider: ProviderId,
        location_key: LocationKey,
        source: Arc<dyn RemoteSource>,
        schema: RecordSchema,
        mapper: Arc<dyn EntityMapper>,
    ) -> Self {
        Self {
            provider,
            location_key,
            source,
            schema,
            mapper,
            options: ReconcileOptions::default(),
            connection: RwLock::new(None),
            busy: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn location_key(&self) -> &LocationKey {
        &self.location_key
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Bind the catalog. Re-binding replaces the previous handle and warns.
    ///
    /// Returns `true` when an earlier connection was replaced.
    pub fn connect(&self, connection: Arc<dyn CatalogConnection>) -> bool {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(connection);
        if previous.is_some() {
            tracing::warn!(
                provider = %self.provider,
                "reconciler connected more than once; replacing the previous catalog connection"
            );
        }
        previous.is_some()
    }

    pub fn state(&self) -> ReconcilerState {
        if self.busy.load(Ordering::Acquire) {
            ReconcilerState::Refreshing
        } else if self.connection().is_some() {
            ReconcilerState::Connected
        } else {
            ReconcilerState::Uninitialized
        }
    }

    fn connection(&self) -> Option<Arc<dyn CatalogConnection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one reconciliation pass. Never fails; see [`PassOutcome`].
    pub async fn refresh(&self) -> PassOutcome {
        let Some(connection) = self.connection() else {
            tracing::error!(provider = %self.provider, "refresh called before connect; pass skipped");
            return PassOutcome::Failed(ReconcileError::NotInitialized);
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!(provider = %self.provider, "refresh already running; dropping this pass");
            return PassOutcome::Busy;
        }
        let _busy = BusyGuard(&self.busy);

        let started = Instant::now();
        match self.run_pass(connection.as_ref(), started).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    provider = %self.provider,
                    error = %err,
                    "reconciliation pass abandoned; catalog left untouched"
                );
                PassOutcome::Failed(err)
            }
        }
    }

    async fn run_pass(
        &self,
        connection: &dyn CatalogConnection,
        started: Instant,
    ) -> Result<PassOutcome, ReconcileError> {
        let prepared = self.prepare().await?;

        if prepared.fetched == 0 && self.options.empty_fetch == EmptyFetchPolicy::Skip {
            tracing::warn!(
                provider = %self.provider,
                source = %self.source.describe(),
                "remote returned zero records; keeping the previous catalog state"
            );
            return Ok(PassOutcome::SkippedEmpty);
        }
        if prepared.fetched == 0 {
            tracing::warn!(
                provider = %self.provider,
                source = %self.source.describe(),
                "remote returned zero records; removing every entity this provider owns"
            );
        }
        if prepared.fetched > 0 && prepared.entities.is_empty() {
            return Err(ReconcileError::AllRecordsRejected {
                rejected: prepared.rejected.len(),
            });
        }

        let fetched = prepared.fetched;
        let rejected = prepared.rejected.len();
        let plan = connection
            .apply_mutation(prepared.into_mutation(self.location_key.clone()))
            .await?;
        self.log_plan(&plan);

        let refreshed = if self.options.refresh_after_apply {
            self.request_refresh(connection, &plan).await
        } else {
            0
        };

        let report = PassReport {
            provider: self.provider.clone(),
            fetched,
            rejected,
            summary: plan.summary(),
            refreshed,
            duration_ms: duration_ms(started.elapsed()),
        };
        tracing::info!(
            provider = %self.provider,
            fetched = report.fetched,
            rejected = report.rejected,
            added = report.summary.added,
            updated = report.summary.updated,
            removed = report.summary.removed,
            unchanged = report.summary.unchanged,
            conflicts = report.summary.conflicts,
            duration_ms = report.duration_ms,
            "reconciliation pass applied"
        );
        Ok(PassOutcome::Applied(report))
    }

    /// Fetch, validate and map without touching any catalog.
    pub async fn prepare(&self) -> Result<PreparedPass, ReconcileError> {
        let items = self.source.fetch().await?;
        let fetched = items.len();
        let (records, mut rejected) = self.schema.validate_all(items);

        let mut seen = HashSet::with_capacity(records.len());
        let mut entities = Vec::with_capacity(records.len());
        for record in &records {
            match self.mapper.map(record) {
                Ok(entity) if seen.insert(entity.key.clone()) => entities.push(entity),
                Ok(entity) => rejected.push(RecordRejection::DuplicateKey {
                    id: record.id.clone(),
                    key: entity.key.to_string(),
                }),
                Err(reason) => rejected.push(RecordRejection::Mapping {
                    id: record.id.clone(),
                    reason,
                }),
            }
        }

        for rejection in &rejected {
            tracing::warn!(provider = %self.provider, reason = %rejection, "record skipped");
        }
        Ok(PreparedPass {
            fetched,
            entities,
            rejected,
        })
    }

    fn log_plan(&self, plan: &MutationPlan) {
        for conflict in plan.conflicts() {
            tracing::warn!(
                provider = %self.provider,
                key = %conflict.key(),
                "entity key owned by another location; left untouched"
            );
        }
    }

    async fn request_refresh(&self, connection: &dyn CatalogConnection, plan: &MutationPlan) -> usize {
        let keys = plan.owned_keys();
        if keys.is_empty() {
            return 0;
        }
        match connection.refresh(&keys).await {
            Ok(()) => keys.len(),
            Err(err) => {
                tracing::warn!(provider = %self.provider, error = %err, "refresh request failed");
                0
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
