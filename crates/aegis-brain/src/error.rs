//! Orchestrator error types.

use uuid::Uuid;

use aegis_risk::Verdict;

/// Errors surfaced by the orchestrator's public API.
///
/// Most pipeline outcomes are in-band [`crate::response::Response`]
/// values; these errors cover the session boundary and execution
/// refusals.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    /// The session does not exist or was evicted by retention.
    #[error("unknown session: {id}")]
    UnknownSession { id: Uuid },

    /// The risk evaluator forbids this command.  No execution is created.
    #[error("command blocked: {}", verdict.reason)]
    RiskBlocked { verdict: Verdict },

    /// The verdict requires explicit confirmation and none was given.
    #[error("confirmation required: {}", verdict.reason)]
    ConfirmationRequired { verdict: Verdict },

    /// Session store failure other than an unknown session.
    #[error(transparent)]
    Store(aegis_store::StoreError),

    /// Executor API failure.
    #[error(transparent)]
    Exec(#[from] aegis_exec::ExecError),
}

impl From<aegis_store::StoreError> for BrainError {
    fn from(e: aegis_store::StoreError) -> Self {
        match e {
            aegis_store::StoreError::UnknownSession { id } => Self::UnknownSession { id },
            other => Self::Store(other),
        }
    }
}

/// Convenience alias used throughout the orchestrator crate.
pub type Result<T> = std::result::Result<T, BrainError>;
