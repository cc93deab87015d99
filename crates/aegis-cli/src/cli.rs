//! CLI argument definitions for Aegis.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use aegis_registry::Role;
use aegis_store::WorkMode;

/// Aegis -- AI-mediated command orchestration for cybersecurity tooling.
#[derive(Parser)]
#[command(
    name = "aegis",
    version,
    about = "Aegis -- AI-mediated command orchestration for cybersecurity tooling",
    long_about = "Submit natural-language requests; Aegis classifies intent, selects a tool \
                  from its registry, composes a safe argv, evaluates risk, and executes \
                  under resource limits with streaming output."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "aegis.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive session.
    Run {
        /// Operator role, used for prompt context and tool ranking.
        #[arg(long, value_enum, default_value_t = RoleArg::Student)]
        role: RoleArg,

        /// Work mode governing automatic execution.
        #[arg(long, value_enum, default_value_t = ModeArg::Interactive)]
        mode: ModeArg,
    },

    /// List the tools available in the registry.
    Tools,

    /// Validate the configuration and registries, then exit.
    Check,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Student,
    ForensicExpert,
    PenTester,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Student => Role::Student,
            RoleArg::ForensicExpert => Role::ForensicExpert,
            RoleArg::PenTester => Role::PenTester,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Quick,
    Interactive,
    Suggester,
}

impl From<ModeArg> for WorkMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Quick => WorkMode::Quick,
            ModeArg::Interactive => WorkMode::Interactive,
            ModeArg::Suggester => WorkMode::Suggester,
        }
    }
}
