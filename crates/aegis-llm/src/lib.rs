//! LLM gateway for Aegis.
//!
//! The rest of the pipeline consumes a single capability from the model:
//! render a named template with bindings and get text back.  This crate
//! provides that capability with retry, deadlines, and a bounded response
//! cache for deterministic calls.
//!
//! ## Modules
//!
//! - [`client`] -- the completion seam and the HTTP implementation.
//! - [`gateway`] -- template rendering, retry/backoff, LRU cache.
//! - [`error`] -- the four completion outcomes.

pub mod client;
pub mod error;
pub mod gateway;
pub mod parse;

pub use client::{CompletionClient, CompletionRequest, HttpClientConfig, HttpCompletionClient};
pub use error::{LlmError, Result};
pub use gateway::{Gateway, GatewayConfig, GatewayError, GenerateOptions};
pub use parse::extract_json;
