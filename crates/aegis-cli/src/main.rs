//! CLI entry point for Aegis.
//!
//! Provides the `aegis` command: an interactive request loop (`run`), a
//! registry listing (`tools`), and a configuration check (`check`).

mod cli;
mod helpers;
mod repl;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use aegis_brain::AegisConfig;

use crate::cli::{Cli, Commands};
use crate::helpers::{build_brain, init_tracing, load_registry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (silently ignore if missing).
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AegisConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run { role, mode } => {
            init_tracing(config.log_level.as_directive());
            let brain = build_brain(&config).await?;
            repl::cmd_run(brain, role.into(), mode.into()).await
        }
        Commands::Tools => cmd_tools(&config),
        Commands::Check => cmd_check(&config),
    }
}

/// List selectable tools with category and baseline risk.
fn cmd_tools(config: &AegisConfig) -> Result<()> {
    init_tracing("warn");
    let registry = load_registry(config)?;

    let mut summaries: Vec<_> = registry.summaries().collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));

    for summary in summaries {
        let available = registry.lookup(&summary.name).is_ok();
        println!(
            "{:<14} {:<22} {:<8} {}",
            summary.name,
            summary.category,
            summary.risk_baseline,
            if available { "" } else { "(unavailable)" }
        );
    }
    Ok(())
}

/// Validate configuration, registries, and the API key without starting.
fn cmd_check(config: &AegisConfig) -> Result<()> {
    init_tracing("warn");

    let registry = load_registry(config)?;
    println!(
        "registries ok: {} tools ({} selectable), {} risk patterns, {} templates",
        registry.summaries().count(),
        registry.selectable_names().len(),
        registry.patterns().len(),
        registry.template_names().len(),
    );

    match AegisConfig::api_key() {
        Ok(_) => println!("api key present"),
        Err(e) => {
            println!("api key missing: {e}");
            anyhow::bail!("startup requirements not met");
        }
    }

    info!("configuration check passed");
    Ok(())
}
