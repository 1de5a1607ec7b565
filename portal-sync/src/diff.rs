//! Dry-run unified diff support for `portal diff` and `portal sync --dry-run`.

use serde_json::Value;
use similar::TextDiff;

use portal_core::config::EmptyFetchPolicy;
use portal_core::types::{EntityKey, EntityMutation, ProviderId};

use crate::catalog::FileCatalog;
use crate::error::ReconcileError;
use crate::mutation::{plan_full_mutation, CatalogState, EntityChange, MutationSummary};
use crate::reconciler::Reconciler;
use crate::SyncError;

/// A single entity body diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDiff {
    pub key: EntityKey,
    /// `added`, `updated` or `removed`.
    pub change: &'static str,
    pub unified_diff: String,
}

/// Diff result for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffProviderResult {
    pub provider: ProviderId,
    pub fetched: usize,
    pub rejected: usize,
    /// The remote returned nothing and the provider skips empty fetches.
    pub empty: bool,
    pub summary: MutationSummary,
    pub diffs: Vec<EntityDiff>,
}

/// Compare what `mutation` would store against `state`. Nothing is written.
pub fn diff_entities(state: &CatalogState, mutation: &EntityMutation) -> Vec<EntityDiff> {
    let EntityMutation::Full { entities, .. } = mutation;
    let plan = plan_full_mutation(state, mutation);

    let incoming = |key: &EntityKey| {
        entities
            .iter()
            .find(|entity| &entity.key == key)
            .map(|entity| pretty(&entity.payload))
            .unwrap_or_default()
    };
    let stored = |key: &EntityKey| {
        state
            .entities
            .get(key)
            .map(|stored| pretty(&stored.entity.payload))
            .unwrap_or_default()
    };

    let mut diffs = Vec::new();
    for change in &plan.changes {
        let (label, old, new) = match change {
            EntityChange::Added { key } => ("added", String::new(), incoming(key)),
            EntityChange::Updated { key } => ("updated", stored(key), incoming(key)),
            EntityChange::Removed { key } => ("removed", stored(key), String::new()),
            EntityChange::Unchanged { .. } | EntityChange::Conflict { .. } => continue,
        };
        let key = change.key();
        let old_header = format!("a/{key}");
        let new_header = format!("b/{key}");
        let unified = TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();
        diffs.push(EntityDiff {
            key: key.clone(),
            change: label,
            unified_diff: unified,
        });
    }
    diffs
}

/// Fetch and map what a pass would apply and compare it to the file catalog.
///
/// The reconciler does not need to be connected; no catalog is written.
pub async fn diff_provider(
    reconciler: &Reconciler,
    catalog: &FileCatalog,
) -> Result<DiffProviderResult, SyncError> {
    let prepared = reconciler.prepare().await?;
    let fetched = prepared.fetched;
    let rejected = prepared.rejected.len();

    let empty = fetched == 0 && reconciler.options().empty_fetch == EmptyFetchPolicy::Skip;
    if empty {
        return Ok(DiffProviderResult {
            provider: reconciler.provider().clone(),
            fetched,
            rejected,
            empty,
            summary: MutationSummary::default(),
            diffs: Vec::new(),
        });
    }
    if fetched > 0 && prepared.entities.is_empty() {
        return Err(ReconcileError::AllRecordsRejected { rejected }.into());
    }

    let state = catalog.load().await?;
    let mutation = prepared.into_mutation(reconciler.location_key().clone());
    let summary = plan_full_mutation(&state, &mutation).summary();
    let diffs = diff_entities(&state, &mutation);

    Ok(DiffProviderResult {
        provider: reconciler.provider().clone(),
        fetched,
        rejected,
        empty,
        summary,
        diffs,
    })
}

fn pretty(payload: &Value) -> String {
    let mut text = serde_json::to_string_pretty(payload).unwrap_or_default();
    text.push('\n');
    text
}
