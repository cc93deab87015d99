//! Session data model.
//!
//! A session owns an ordered sequence of interactions.  Interactions are
//! append-only records: once written they are never mutated, and the
//! per-session count never decreases within retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_registry::Role;
use aegis_risk::Verdict;

/// How eagerly the pipeline executes composed commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    /// Execute allowed commands immediately; warn-level commands are
    /// surfaced with a preselected confirmation.
    Quick,
    /// Never auto-execute; always preview and wait.
    #[default]
    Interactive,
    /// Return ranked alternatives; never execute.
    Suggester,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Interactive => "interactive",
            Self::Suggester => "suggester",
        }
    }
}

impl std::fmt::Display for WorkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier (UUID v7, time-ordered).
    pub id: Uuid,
    pub role: Role,
    pub mode: WorkMode,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(role: Role, mode: WorkMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            role,
            mode,
            created_at: now,
            last_activity: now,
        }
    }
}

/// One immutable record of a user request and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,

    /// The cleaned user input.
    pub user_input: String,

    /// The classified intent, as its wire name.
    pub intent: String,

    /// The composed argv, when the request produced a command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// The selected tool, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// The risk verdict, when a command was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Verdict>,

    /// The execution this interaction produced, when any.  Appended only
    /// after the execution reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,

    pub success: bool,

    /// Wall-clock duration of the whole interaction in milliseconds.
    pub duration_ms: u64,

    /// Total output bytes produced by the execution, if any.
    #[serde(default)]
    pub output_bytes: u64,

    /// Tool-output parser failure note, if the parser ran and failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl Interaction {
    /// A plain conversational interaction with no command.
    pub fn conversational(user_input: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_input: user_input.into(),
            intent: intent.into(),
            command: None,
            tool: None,
            risk: None,
            execution_id: None,
            success: true,
            duration_ms: 0,
            output_bytes: 0,
            parse_error: None,
        }
    }

    /// Whether this interaction carries a composed command.
    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }
}

/// Which history view to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    /// Every interaction, conversational or not.
    Conversation,
    /// Only interactions that produced a command.
    Commands,
}

/// Derived per-session metrics, recomputed on demand from live entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub total_interactions: usize,
    /// Command count per tool.
    pub tool_usage: std::collections::HashMap<String, u64>,
    /// Fraction of command interactions that succeeded, 0.0 when none ran.
    pub success_rate: f64,
    /// Mean execution duration across command interactions, milliseconds.
    pub avg_duration_ms: f64,
    /// Interactions per hour of day (UTC), 24 buckets.
    pub hourly_histogram: Vec<u64>,
}

/// Snapshot returned by session status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub command_count: usize,
    pub tools_used: Vec<String>,
    /// Seconds since the session was created.
    pub duration_secs: i64,
    pub last_activity: DateTime<Utc>,
}
