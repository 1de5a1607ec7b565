//! Shared sync pipeline entrypoint used by CLI and daemon.
//!
//! Wires configured providers into reconcilers: HTTP source, record schema,
//! template mapper and the file catalog under `<home>/.portal/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use portal_core::config::{PortalConfig, ProviderConfig};
use portal_renderer::{RenderError, TemplateEngine};
use portal_source::{HttpSource, RemoteSource};

use crate::catalog::FileCatalog;
use crate::diff::{diff_provider, DiffProviderResult};
use crate::history;
use crate::mapper::TemplateMapper;
use crate::reconciler::{PassOutcome, ReconcileOptions, Reconciler};
use crate::schedule::ScheduledProvider;
use crate::validate::RecordSchema;
use crate::SyncError;

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Sync every configured provider.
    All,
    /// Sync a single provider by id.
    Provider(String),
}

/// What happened to one provider during a run.
#[derive(Debug)]
pub enum SyncOutcome {
    Pass(PassOutcome),
    DryRun(DiffProviderResult),
    /// The dry run could not compute a diff (fetch failure, all records rejected).
    DryRunFailed(String),
}

#[derive(Debug)]
pub struct SyncProviderResult {
    pub provider: String,
    pub outcome: SyncOutcome,
}

impl SyncProviderResult {
    pub fn is_failure(&self) -> bool {
        match &self.outcome {
            SyncOutcome::Pass(outcome) => outcome.is_failure(),
            SyncOutcome::DryRun(_) => false,
            SyncOutcome::DryRunFailed(_) => true,
        }
    }
}

/// `<home>/.portal/templates/`: user overrides for entity templates.
pub fn templates_dir_at(home: &Path) -> PathBuf {
    home.join(".portal").join("templates")
}

/// Template engine with the user's overrides, when the directory exists.
pub fn engine_at(home: &Path) -> Result<Arc<TemplateEngine>, SyncError> {
    let dir = templates_dir_at(home);
    let user_dir = dir.is_dir().then_some(dir.as_path());
    Ok(Arc::new(TemplateEngine::with_user_templates(user_dir)?))
}

/// Build the reconciler for one configured provider. Not yet connected.
pub fn build_reconciler(
    provider: &ProviderConfig,
    engine: Arc<TemplateEngine>,
) -> Result<Reconciler, SyncError> {
    if !engine.has_template(&provider.template) {
        return Err(RenderError::UnknownTemplate {
            name: provider.template.clone(),
        }
        .into());
    }
    let location_key = provider.effective_location_key();
    let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::from_config(&provider.source)?);
    let mapper = TemplateMapper::new(
        provider.id.clone(),
        location_key.clone(),
        provider.template.clone(),
        engine,
    );
    let reconciler = Reconciler::new(
        provider.id.clone(),
        location_key,
        source,
        RecordSchema::from(&provider.source),
        Arc::new(mapper),
    )
    .with_options(ReconcileOptions {
        empty_fetch: provider.empty_fetch,
        refresh_after_apply: provider.refresh_after_apply,
    });
    Ok(reconciler)
}

/// Build a scheduled provider for every configured provider.
pub fn build_providers_at(
    home: &Path,
    config: &PortalConfig,
) -> Result<Vec<ScheduledProvider>, SyncError> {
    let engine = engine_at(home)?;
    config
        .providers
        .iter()
        .map(|provider| {
            let reconciler = build_reconciler(provider, Arc::clone(&engine))?;
            Ok(ScheduledProvider::new(reconciler, provider.schedule.clone()))
        })
        .collect()
}

/// Run one pass (or dry run) for every provider in `scope`.
///
/// This is the canonical sync entrypoint for `portal sync`. Applied passes
/// are recorded in the provider history; dry runs write nothing.
pub async fn run(
    home: &Path,
    config: &PortalConfig,
    scope: SyncScope,
    dry_run: bool,
) -> Result<Vec<SyncProviderResult>, SyncError> {
    let providers: Vec<&ProviderConfig> = match &scope {
        SyncScope::All => config.providers.iter().collect(),
        SyncScope::Provider(id) => vec![config.provider(id)?],
    };

    let engine = engine_at(home)?;
    let catalog = Arc::new(FileCatalog::at_home(home));
    let mut results = Vec::with_capacity(providers.len());

    for provider in providers {
        let reconciler = build_reconciler(provider, Arc::clone(&engine))?;
        let outcome = if dry_run {
            match diff_provider(&reconciler, &catalog).await {
                Ok(diff) => SyncOutcome::DryRun(diff),
                Err(err) => SyncOutcome::DryRunFailed(err.to_string()),
            }
        } else {
            reconciler.connect(catalog.clone());
            let outcome = reconciler.refresh().await;
            history::record_in_background(home, &provider.id, &outcome, Utc::now()).await?;
            SyncOutcome::Pass(outcome)
        };
        tracing::debug!(provider = %provider.id, dry_run, "provider processed");
        results.push(SyncProviderResult {
            provider: provider.id.to_string(),
            outcome,
        });
    }
    Ok(results)
}
