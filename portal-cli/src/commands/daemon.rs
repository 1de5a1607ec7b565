//! `portal daemon`: scheduler daemon lifecycle.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{json, Value};

use portal_daemon::{request_status, start_blocking, DaemonClient, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Print the daemon's provider states as JSON.
    Status,
    /// Ask the daemon to run a pass now.
    Refresh {
        /// Provider id; every provider when omitted.
        provider: Option<String>,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;
    let client = DaemonClient::at_home(&home);

    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
        DaemonCommand::Stop => match client.stop() {
            Ok(()) => {
                println!("daemon stop requested");
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
                Ok(())
            }
            Err(err) => Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { socket }) => json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            print_json(&payload)
        }
        DaemonCommand::Refresh { provider } => {
            let results = client
                .refresh(provider)
                .context("failed to request refresh (is `portal daemon start` running?)")?;
            print_json(&results)
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
