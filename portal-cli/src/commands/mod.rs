pub mod daemon;
pub mod diff;
pub mod flags;
pub mod init;
pub mod provider;
pub mod status;
pub mod sync;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};

use portal_core::config::{self, PortalConfig};

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn load_config(home: &std::path::Path) -> Result<PortalConfig> {
    config::load_at(home).context("failed to load config; run `portal init` first")
}

/// Drive one async command to completion on a current-thread runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
