//! `portal provider list`

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use portal_core::config::AuthConfig;
use portal_sync::pipeline;

/// Inspect configured entity providers.
#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    /// List configured providers with their source and schedule.
    List,
}

#[derive(Tabled)]
struct ProviderRow {
    #[tabled(rename = "provider")]
    id: String,
    #[tabled(rename = "location key")]
    location_key: String,
    #[tabled(rename = "source")]
    url: String,
    #[tabled(rename = "auth")]
    auth: &'static str,
    #[tabled(rename = "every")]
    frequency: String,
    #[tabled(rename = "template")]
    template: String,
}

pub fn run(command: ProviderCommand) -> Result<()> {
    match command {
        ProviderCommand::List => list(),
    }
}

fn list() -> Result<()> {
    let home = super::home()?;
    let config = super::load_config(&home)?;

    if config.providers.is_empty() {
        println!("No providers configured.");
        println!("Add one under `providers:` in ~/.portal/config.yaml");
        return Ok(());
    }

    let engine = pipeline::engine_at(&home).context("failed to load entity templates")?;
    let rows: Vec<ProviderRow> = config
        .providers
        .iter()
        .map(|provider| ProviderRow {
            id: provider.id.to_string(),
            location_key: provider.effective_location_key().to_string(),
            url: provider.source.url.clone(),
            auth: auth_label(&provider.source.auth),
            frequency: format!("{}s", provider.schedule.frequency_secs),
            template: if engine.has_template(&provider.template) {
                provider.template.clone()
            } else {
                format!("{} (missing)", provider.template)
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn auth_label(auth: &AuthConfig) -> &'static str {
    match auth {
        AuthConfig::None => "none",
        AuthConfig::Bearer { .. } => "bearer",
        AuthConfig::Basic { .. } => "basic",
        AuthConfig::ClientCredentials { .. } => "client credentials",
    }
}
