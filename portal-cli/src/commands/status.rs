//! `portal status`: last sync and health per provider.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use portal_core::config::PortalConfig;
use portal_sync::status::{check_at, format_datetime_age};
use portal_sync::{ProviderHistory, ProviderStatus};

/// Arguments for `portal status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this provider.
    #[arg(long)]
    pub provider: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;

        let report = build_report(&home, &config, self.provider.as_deref())?;
        if self.json {
            print_json(report)?;
            return Ok(());
        }

        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ProviderRowData {
    provider: String,
    status: ProviderStatus,
    detail: String,
    last_success_age: String,
    last_success_at: Option<String>,
    last_attempt_at: Option<String>,
    entity_count: usize,
}

#[derive(Debug, Clone)]
struct StatusReport {
    needs_sync_count: usize,
    failing_count: usize,
    providers: Vec<ProviderRowData>,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    providers: Vec<ProviderStatusJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    providers: usize,
    failing: usize,
    needs_sync: usize,
}

#[derive(Serialize)]
struct ProviderStatusJson {
    provider: String,
    status: String,
    detail: String,
    last_success_age: String,
    last_success_at: Option<String>,
    last_attempt_at: Option<String>,
    entity_count: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "provider")]
    provider: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "last success")]
    last_success: String,
    #[tabled(rename = "entities")]
    entity_count: usize,
}

fn build_report(home: &Path, config: &PortalConfig, only: Option<&str>) -> Result<StatusReport> {
    let providers = match only {
        Some(id) => vec![config.provider(id)?],
        None => config.providers.iter().collect(),
    };

    let now = Utc::now();
    let mut rows = Vec::with_capacity(providers.len());
    for provider in providers {
        let (status, history) = check_at(home, provider, now)
            .with_context(|| format!("status check failed for '{}'", provider.id))?;
        rows.push(row(provider.id.to_string(), status, history));
    }

    let failing_count = rows
        .iter()
        .filter(|r| matches!(r.status, ProviderStatus::Failing { .. }))
        .count();
    let needs_sync_count = rows
        .iter()
        .filter(|r| !matches!(r.status, ProviderStatus::Current))
        .count();

    Ok(StatusReport {
        needs_sync_count,
        failing_count,
        providers: rows,
    })
}

fn row(provider: String, status: ProviderStatus, history: Option<ProviderHistory>) -> ProviderRowData {
    let history = history.unwrap_or_default();
    let last_success_age = history
        .last_success_at
        .map(format_datetime_age)
        .unwrap_or_else(|| "never".to_string());
    ProviderRowData {
        provider,
        detail: status_detail(&status, &history),
        status,
        last_success_age,
        last_success_at: history.last_success_at.map(|at| at.to_rfc3339()),
        last_attempt_at: history.last_attempt_at.map(|at| at.to_rfc3339()),
        entity_count: history.entity_count,
    }
}

fn print_json(report: StatusReport) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            providers: report.providers.len(),
            failing: report.failing_count,
            needs_sync: report.needs_sync_count,
        },
        providers: report
            .providers
            .into_iter()
            .map(|row| ProviderStatusJson {
                provider: row.provider,
                status: status_key(&row.status).to_string(),
                detail: row.detail,
                last_success_age: row.last_success_age,
                last_success_at: row.last_success_at,
                last_attempt_at: row.last_attempt_at,
                entity_count: row.entity_count,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(report: StatusReport) {
    println!(
        "Portal v{} | {} providers | {} failing",
        env!("CARGO_PKG_VERSION"),
        report.providers.len(),
        report.failing_count,
    );

    if report.providers.is_empty() {
        println!("No providers configured.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} CURRENT  {} STALE  {} FAILING  {} NEVER SYNCED",
        status_indicator(&ProviderStatus::Current),
        status_indicator(&ProviderStatus::Stale {
            reason: String::new(),
        }),
        status_indicator(&ProviderStatus::Failing {
            error: String::new(),
        }),
        status_indicator(&ProviderStatus::NeverSynced),
    );
    println!("{separator}");

    let table_rows: Vec<StatusTableRow> = report
        .providers
        .into_iter()
        .map(|row| StatusTableRow {
            provider: row.provider,
            status: format!("{} {}", status_indicator(&row.status), row.status.label().to_uppercase()),
            detail: row.detail,
            last_success: row.last_success_age,
            entity_count: row.entity_count,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.needs_sync_count > 0 {
        println!("Run 'portal sync --all' to refresh providers that are not current.");
    }
}

fn status_key(status: &ProviderStatus) -> &'static str {
    match status {
        ProviderStatus::NeverSynced => "never_synced",
        ProviderStatus::Current => "current",
        ProviderStatus::Stale { .. } => "stale",
        ProviderStatus::Failing { .. } => "failing",
    }
}

fn status_indicator(status: &ProviderStatus) -> String {
    match status {
        ProviderStatus::NeverSynced => "■".bright_black().bold().to_string(),
        ProviderStatus::Current => "■".green().bold().to_string(),
        ProviderStatus::Stale { .. } => "■".yellow().bold().to_string(),
        ProviderStatus::Failing { .. } => "■".red().bold().to_string(),
    }
}

fn status_detail(status: &ProviderStatus, history: &ProviderHistory) -> String {
    match status {
        ProviderStatus::NeverSynced => "no successful pass recorded".to_string(),
        ProviderStatus::Current => match &history.last_outcome {
            Some(outcome) => format!("last pass {outcome}"),
            None => "up to date".to_string(),
        },
        ProviderStatus::Stale { reason } => reason.clone(),
        ProviderStatus::Failing { error } => error.clone(),
    }
}
