//! `portal init`: create the default configuration.

use anyhow::{Context, Result};
use clap::Args;

use portal_core::config;

/// Create `~/.portal/config.yaml` with an empty provider list.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let existed = config::config_path_at(&home).exists();
        let loaded = config::init_at(&home).context("failed to initialize portal config")?;

        let path = config::config_path_at(&home);
        if existed {
            println!(
                "✓ Already initialized ({} providers, {} flags)",
                loaded.providers.len(),
                loaded.flags.len()
            );
        } else {
            println!("✓ Initialized portal config");
        }
        println!("  Config: {}", path.display());
        Ok(())
    }
}
