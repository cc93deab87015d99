//! Registry error types.
//!
//! All registry subsystems surface errors through [`RegistryError`], the
//! single error type returned by every public API in this crate.  Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

/// Unified error type for the Aegis registry store.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The requested tool is not present in the master registry.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    /// The tool is listed in the master registry but its detailed
    /// per-tool registry failed to load, so it cannot be selected.
    #[error("tool unavailable: {name} ({reason})")]
    ToolUnavailable { name: String, reason: String },

    /// The requested prompt template does not exist.
    #[error("template missing: {name}")]
    TemplateMissing { name: String },

    /// A registry file could not be read or parsed.
    #[error("failed to load {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// The risk-pattern database is absent or malformed.  This is fatal:
    /// the safety floor must exist before any command is evaluated.
    #[error("risk pattern database unusable: {reason}")]
    RiskDbUnusable { reason: String },

    /// A risk pattern's regex failed to compile.
    #[error("invalid risk pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Underlying filesystem error.
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
