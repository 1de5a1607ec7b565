//! `portal diff <provider>`: show unified diffs for what a pass would apply.

use anyhow::{Context, Result};
use clap::Args;

use portal_sync::{diff_provider, pipeline, FileCatalog};

/// Arguments for `portal diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Provider id to diff.
    pub provider: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let provider = config.provider(&self.provider)?;

        let engine = pipeline::engine_at(&home).context("failed to load entity templates")?;
        let reconciler = pipeline::build_reconciler(provider, engine)
            .with_context(|| format!("failed to build provider '{}'", self.provider))?;
        let catalog = FileCatalog::at_home(&home);

        let result = super::block_on(diff_provider(&reconciler, &catalog))?
            .with_context(|| format!("diff failed for '{}'", self.provider))?;

        if result.empty {
            println!(
                "Remote for '{}' returned no records; nothing would change.",
                result.provider
            );
            return Ok(());
        }
        if result.diffs.is_empty() {
            println!("No differences for '{}'.", result.provider);
            return Ok(());
        }

        for diff in result.diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
