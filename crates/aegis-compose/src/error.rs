//! Composition error types.

/// Failures of tool selection or command composition.
///
/// Every variant is a reportable outcome, not an incident: the
/// orchestrator surfaces these in the response and no execution is
/// attempted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComposeError {
    /// No tool in the registry fits the request.
    #[error("no suitable tool found")]
    NoToolFound,

    /// A placeholder survived composition and has no registry default.
    #[error("unresolved placeholder: {name}")]
    UnresolvedPlaceholder { name: String },

    /// A required parameter has neither a supplied value nor a default.
    #[error("missing required parameter: {name}")]
    MissingRequired { name: String },

    /// A supplied flag, positional, or value failed registry validation.
    #[error("validation failed for `{param}`: {reason}")]
    ValidationFailed { param: String, reason: String },

    /// The model could not be reached and no deterministic path applied.
    #[error("llm unavailable: {reason}")]
    LlmUnavailable { reason: String },
}

/// Convenience alias used throughout the composition crate.
pub type Result<T> = std::result::Result<T, ComposeError>;
