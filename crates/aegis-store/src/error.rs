//! Store error types.

use uuid::Uuid;

/// Unified error type for the session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The session does not exist (never created, deleted, or evicted by
    /// retention).
    #[error("unknown session: {id}")]
    UnknownSession { id: Uuid },

    /// A session shard could not be read or written.
    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),

    /// A shard line could not be serialized or parsed.
    #[error("session store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking file task failed to join.
    #[error("store task join error: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskJoin(e.to_string())
    }
}

/// Convenience alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;
