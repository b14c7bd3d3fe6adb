//! `polyglot instances`: what discovery finds in this environment.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use polyglot_coordinator::{from_environment, InstanceStatus};

use super::load_config;

/// Arguments for `polyglot instances`.
#[derive(Args, Debug)]
pub struct InstancesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "provider")]
    provider: String,
    #[tabled(rename = "model")]
    model: String,
    #[tabled(rename = "status")]
    status: String,
}

impl InstancesArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let coordinator = from_environment(&config, None);
        let status = coordinator.status();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to serialize instance JSON")?
            );
            return Ok(());
        }

        println!(
            "Polyglot v{} | {} instance(s) | {} available",
            env!("CARGO_PKG_VERSION"),
            status.len(),
            coordinator.available_count(),
        );
        if status.is_empty() {
            println!("No LLM instances discovered. Set a provider API key or configure a remote.");
            return Ok(());
        }

        let rows: Vec<InstanceRow> = status.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(status: &InstanceStatus) -> InstanceRow {
    let label = match (status.available, status.certified) {
        (true, _) => "AVAILABLE".green().bold().to_string(),
        (false, Some(false)) => "UNPAIRED".yellow().bold().to_string(),
        (false, _) => "COOLING DOWN".red().bold().to_string(),
    };
    InstanceRow {
        id: status.id.to_string(),
        provider: status.provider.to_string(),
        model: status.model.clone(),
        status: label,
    }
}
