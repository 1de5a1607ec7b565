//! Portal: entity provider reconciliation and feature flag CLI.
//!
//! # Usage
//!
//! ```text
//! portal init
//! portal provider list
//! portal sync <provider> [--dry-run]
//! portal sync --all [--dry-run]
//! portal status [--json]
//! portal diff <provider>
//! portal flags list|get <name>|set <name> <true|false>
//! portal daemon start|stop|status|refresh [<provider>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, flags::FlagsCommand, init::InitArgs,
    provider::ProviderCommand, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "portal",
    version,
    about = "Reconcile remote entity providers into a local catalog and manage feature flags",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create ~/.portal/config.yaml if it does not exist.
    Init(InitArgs),

    /// Inspect configured entity providers.
    Provider {
        #[command(subcommand)]
        command: ProviderCommand,
    },

    /// Run one reconciliation pass for a provider (or all of them).
    Sync(SyncArgs),

    /// Show last sync and health per provider.
    Status(StatusArgs),

    /// Show unified diff of what a pass would change in the catalog.
    Diff(DiffArgs),

    /// Read and write feature flags.
    Flags {
        #[command(subcommand)]
        command: FlagsCommand,
    },

    /// Run or control the background scheduler daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Provider { command } => commands::provider::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Flags { command } => commands::flags::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
