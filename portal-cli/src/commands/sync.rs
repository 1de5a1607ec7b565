//! `portal sync`: run one reconciliation pass per provider.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use portal_sync::{
    pipeline::{self, SyncScope},
    MutationSummary, PassOutcome, SyncOutcome, SyncProviderResult,
};

/// Arguments for `portal sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Provider id to sync (omit when using `--all`).
    pub provider: Option<String>,

    /// Sync every configured provider.
    #[arg(long, conflicts_with = "provider")]
    pub all: bool,

    /// Show what would change without applying anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;

        let scope = if self.all {
            SyncScope::All
        } else {
            let id = self
                .provider
                .clone()
                .context("provide a provider id or use --all")?;
            SyncScope::Provider(id)
        };
        let label = match &scope {
            SyncScope::All => "sync --all".to_string(),
            SyncScope::Provider(id) => format!("sync '{id}'"),
        };

        let results = super::block_on(pipeline::run(&home, &config, scope, self.dry_run))?
            .with_context(|| format!("{label} failed"))?;
        if results.is_empty() {
            println!("No providers configured. Add one to ~/.portal/config.yaml first.");
            return Ok(());
        }

        for result in &results {
            print_result(result);
        }
        let failed = results.iter().filter(|r| r.is_failure()).count();
        if failed > 0 {
            bail!("{failed} provider(s) failed");
        }
        Ok(())
    }
}

fn print_result(result: &SyncProviderResult) {
    let name = &result.provider;
    match &result.outcome {
        SyncOutcome::Pass(PassOutcome::Applied(report)) => {
            println!("{} '{name}' synced ({})", "✓".green(), counts(&report.summary));
            if report.rejected > 0 {
                println!("  {} {} of {} records skipped", "!".yellow(), report.rejected, report.fetched);
            }
        }
        SyncOutcome::Pass(PassOutcome::SkippedEmpty) => {
            println!(
                "{} '{name}' remote returned no records; catalog left unchanged",
                "!".yellow()
            );
        }
        SyncOutcome::Pass(PassOutcome::Busy) => {
            println!("· '{name}' already running; pass dropped");
        }
        SyncOutcome::Pass(PassOutcome::Failed(err)) => {
            println!("{} '{name}' failed: {err}", "✗".red());
        }
        SyncOutcome::DryRun(diff) => {
            if diff.empty {
                println!("[dry-run] '{name}' remote returned no records; nothing would change");
                return;
            }
            println!("[dry-run] ✓ '{name}' would sync ({})", counts(&diff.summary));
            for entity in &diff.diffs {
                let marker = match entity.change {
                    "added" => "+",
                    "removed" => "-",
                    _ => "~",
                };
                println!("  {marker}  {}", entity.key);
            }
        }
        SyncOutcome::DryRunFailed(err) => {
            println!("[dry-run] {} '{name}' failed: {err}", "✗".red());
        }
    }
}

fn counts(summary: &MutationSummary) -> String {
    let mut text = format!(
        "{} added, {} updated, {} removed, {} unchanged",
        summary.added, summary.updated, summary.removed, summary.unchanged
    );
    if summary.conflicts > 0 {
        text.push_str(&format!(", {} conflicts", summary.conflicts));
    }
    text
}
