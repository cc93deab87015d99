//! Execution types and the status state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an execution.
///
/// ```text
///                  submit
///  (nonexistent) ─────────▶ queued
///      queued ── slot free ──▶ running
///      running ── exit 0 ────▶ completed  (terminal)
///      running ── exit ≠0 ───▶ failed     (terminal)
///      running ── cancel ────▶ cancelled  (terminal)
///      running ── deadline ──▶ timed_out  (terminal)
///      queued  ── cancel ────▶ cancelled  (terminal)
/// ```
///
/// Terminal states are write-once: a single driver task owns every
/// transition for its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecStatus {
    /// Whether this status ends the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an execution ended in `failed` or `timed_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecFailure {
    /// The process could not be started (binary missing, permissions).
    SpawnError { reason: String },
    /// A resource cap was breached and the process was killed.
    ResourceExceeded,
    /// The wall-clock deadline elapsed.
    Timeout,
    /// The process exited with a non-zero status.
    NonZeroExit { code: i32 },
}

/// How the caller wants the execution hosted.
///
/// All modes run under the same resource and streaming contract; the mode
/// is recorded on the execution so transports can route output channels
/// accordingly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Detached from the request that spawned it.
    #[default]
    Background,
    /// Output artifacts retained for later inspection.
    Persistent,
    /// Isolated process group of its own (always the case on Unix).
    Separate,
}

/// Which output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Out,
    Err,
}

/// Events delivered to execution subscribers.
///
/// Per-stream chunk order matches production order; interleaving between
/// `out` and `err` is unspecified.  `Complete` is always the final event.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    Output {
        stream: StreamKind,
        chunk: Vec<u8>,
    },
    Status {
        status: ExecStatus,
    },
    Complete {
        return_code: Option<i32>,
        failure: Option<ExecFailure>,
    },
}

impl ExecEvent {
    /// Serialise for a streaming channel as a JSON frame.
    pub fn to_frame(&self) -> serde_json::Value {
        match self {
            Self::Output { stream, chunk } => serde_json::json!({
                "type": "output",
                "stream": match stream {
                    StreamKind::Out => "out",
                    StreamKind::Err => "err",
                },
                "chunk": String::from_utf8_lossy(chunk),
            }),
            Self::Status { status } => serde_json::json!({
                "type": "status",
                "status": status.as_str(),
            }),
            Self::Complete {
                return_code,
                failure,
            } => serde_json::json!({
                "type": "complete",
                "return_code": return_code,
                "error": failure,
            }),
        }
    }
}

/// Resource caps applied to every execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceCaps {
    /// CPU time limit, seconds.
    pub cpu_seconds: u64,
    /// Address-space limit, bytes.
    pub mem_bytes: u64,
    /// Written-file-size limit, bytes.
    pub fsize_bytes: u64,
    /// Per-stream captured/streamed output cap, bytes.
    pub output_cap_bytes: usize,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self {
            cpu_seconds: 300,
            mem_bytes: 1 << 30,
            fsize_bytes: 100 * 1024 * 1024,
            output_cap_bytes: 4 * 1024 * 1024,
        }
    }
}

/// A request to run an argv.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub session_id: Uuid,
    pub argv: Vec<String>,
    pub mode: ExecutionMode,
    /// Wall-clock deadline.  Zero means immediate timeout with no spawn.
    pub deadline: Duration,
    pub caps: ResourceCaps,
    /// Name of a registered output parser to run on final stdout.
    pub parser: Option<String>,
}

impl SpawnRequest {
    pub fn new(session_id: Uuid, argv: Vec<String>) -> Self {
        Self {
            session_id,
            argv,
            mode: ExecutionMode::default(),
            deadline: Duration::from_secs(120),
            caps: ResourceCaps::default(),
            parser: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_caps(mut self, caps: ResourceCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = Some(parser.into());
        self
    }
}

/// Point-in-time view of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: Uuid,
    pub session_id: Uuid,
    pub argv: Vec<String>,
    pub mode: ExecutionMode,
    pub status: ExecStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecFailure>,
    /// Bytes admitted per stream (capped).
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Structured summary from the tool's output parser, when one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    /// Parser failure note; parsing is best-effort and never fatal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}
