//! Executor error types.

use uuid::Uuid;

/// Errors returned by the executor's public API.
///
/// Failures of the command itself (spawn errors, resource breaches,
/// timeouts, non-zero exits) are not errors here — they are terminal
/// execution states carrying an [`crate::execution::ExecFailure`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The referenced execution does not exist.
    #[error("unknown execution: {id}")]
    UnknownExecution { id: Uuid },

    /// Writing output artifacts failed.
    #[error("executor io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the executor crate.
pub type Result<T> = std::result::Result<T, ExecError>;
