//! `portal flags`: read and write feature flags.
//!
//! Values persist in `~/.portal/storage/featureFlags.json`, so a `set` in one
//! invocation is visible to the next.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use portal_core::types::FlagPersistence;
use portal_flags::{JsonFileTransport, PersistedFeatureFlags, TracingReporter, FLAGS_BUCKET};

#[derive(Subcommand, Debug)]
pub enum FlagsCommand {
    /// List declared flags with their current value.
    List,
    /// Print whether a flag is active.
    Get {
        /// Flag name.
        name: String,
    },
    /// Activate or deactivate a flag.
    Set {
        /// Flag name.
        name: String,
        /// `true` or `false`.
        #[arg(action = ArgAction::Set)]
        active: bool,
    },
}

#[derive(Tabled)]
struct FlagRow {
    #[tabled(rename = "flag")]
    name: String,
    #[tabled(rename = "plugin")]
    plugin: String,
    #[tabled(rename = "persistence")]
    persistence: &'static str,
    #[tabled(rename = "active")]
    active: String,
    #[tabled(rename = "description")]
    description: String,
}

pub fn run(command: FlagsCommand) -> Result<()> {
    let home = super::home()?;
    let config = super::load_config(&home)?;
    let flags = open_flags(&home, config.strict_mode, config.feature_flags());

    match command {
        FlagsCommand::List => list(&flags),
        FlagsCommand::Get { name } => {
            check_registered(&flags, &name, config.strict_mode)?;
            let active = super::block_on(flags.is_active(&name))?
                .with_context(|| format!("failed to read flag '{name}'"))?;
            println!("{active}");
            Ok(())
        }
        FlagsCommand::Set { name, active } => {
            check_registered(&flags, &name, config.strict_mode)?;
            super::block_on(flags.set(&name, active))?
                .with_context(|| format!("failed to write flag '{name}'"))?;
            if flags
                .flag(&name)
                .is_some_and(|flag| flag.persistence == FlagPersistence::Session)
            {
                println!(
                    "{} '{name}' is a session flag; the value lasts only for this process",
                    "!".yellow()
                );
            }
            println!("{} {name} = {active}", "✓".green());
            Ok(())
        }
    }
}

fn open_flags(
    home: &Path,
    strict_mode: bool,
    declared: Vec<portal_core::types::FeatureFlag>,
) -> PersistedFeatureFlags {
    PersistedFeatureFlags::new(
        Arc::new(JsonFileTransport::at_home(home, FLAGS_BUCKET)),
        Arc::new(TracingReporter),
        strict_mode,
    )
    .with_flags(declared)
}

fn check_registered(flags: &PersistedFeatureFlags, name: &str, strict_mode: bool) -> Result<()> {
    if flags.flag(name).is_some() {
        return Ok(());
    }
    if strict_mode {
        bail!("flag '{name}' is not declared in config.yaml (strict mode)");
    }
    eprintln!("{} flag '{name}' is not declared in config.yaml", "!".yellow());
    Ok(())
}

fn list(flags: &PersistedFeatureFlags) -> Result<()> {
    let declared = flags.all_flags();
    if declared.is_empty() {
        println!("No flags declared. Add them under `flags:` in ~/.portal/config.yaml");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(declared.len());
    for flag in declared {
        let active = super::block_on(flags.is_active(flag.name.as_str()))?
            .with_context(|| format!("failed to read flag '{}'", flag.name))?;
        rows.push(FlagRow {
            name: flag.name.to_string(),
            plugin: flag.plugin_id.to_string(),
            persistence: match flag.persistence {
                FlagPersistence::Persisted => "persisted",
                FlagPersistence::Session => "session",
            },
            active: if active {
                "yes".green().to_string()
            } else {
                "no".to_string()
            },
            description: flag.description.unwrap_or_default(),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
