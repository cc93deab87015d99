//! LLM gateway error types.
//!
//! The gateway never panics and never surfaces transport internals; every
//! failure is one of four outcomes that callers are expected to handle.

/// The four failure outcomes of a completion call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// The per-call deadline elapsed before a response arrived.
    #[error("llm call timed out after {deadline_ms} ms")]
    Timeout { deadline_ms: u64 },

    /// The endpoint rejected the request (non-retryable 4xx).
    #[error("llm endpoint rejected request ({status}): {reason}")]
    RemoteRejected { status: u16, reason: String },

    /// The request budget is exhausted (HTTP 429).
    #[error("llm quota exceeded")]
    QuotaExceeded,

    /// Transport failure or 5xx after retries were exhausted.
    #[error("llm endpoint unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Convenience alias used throughout the gateway crate.
pub type Result<T> = std::result::Result<T, LlmError>;
