//! Orchestrator for Aegis.
//!
//! This crate implements the top-level pipeline: a user request is
//! cleaned, triaged into an intent, and routed — to tool selection,
//! command composition, and risk evaluation for command-class intents;
//! to templated chat, explanation, or planning otherwise.  Executions
//! stream back through the orchestrator and are recorded in the session
//! only after reaching a terminal status.
//!
//! ## Modules
//!
//! - [`brain`] -- the pipeline and its service facade.
//! - [`intent`] -- the intent taxonomy and triage-reply parsing.
//! - [`response`] -- public response shapes.
//! - [`config`] -- the service configuration document.
//! - [`error`] -- orchestrator error types.

pub mod brain;
pub mod config;
pub mod error;
pub mod intent;
pub mod response;

pub use brain::{Brain, BrainConfig, ExecutionHandle};
pub use config::{AegisConfig, API_KEY_ENV, ConfigError, LogLevel};
pub use error::{BrainError, Result};
pub use intent::Intent;
pub use response::{CommandView, PlanStepView, PlanView, Response, SuggestionView};
