//! Risk verdicts.

use serde::{Deserialize, Serialize};

use aegis_registry::{RiskAction, RiskLevel};

/// The evaluator's output for a candidate command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Merged severity.
    pub level: RiskLevel,

    /// What the pipeline does with the command.
    pub action: RiskAction,

    /// Human-readable justification.
    pub reason: String,

    /// Description of the static pattern that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Safer alternatives suggested by the matched pattern.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,

    /// Set when the contextual pass was unavailable and the verdict is
    /// static-only.
    #[serde(default)]
    pub degraded: bool,
}

impl Verdict {
    /// A verdict that unconditionally blocks execution.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            level: RiskLevel::Critical,
            action: RiskAction::Block,
            reason: reason.into(),
            pattern: None,
            alternatives: Vec::new(),
            degraded: false,
        }
    }

    /// Whether this verdict permits an execution to be created.
    pub fn permits_execution(&self) -> bool {
        self.action != RiskAction::Block
    }
}

/// Derive the action for a merged level.
///
/// `critical` always blocks.  Levels at or above `confirm_at` require
/// confirmation; `medium` below the threshold warns; `safe` and `low`
/// pass through.
pub fn action_for_level(level: RiskLevel, confirm_at: RiskLevel) -> RiskAction {
    if level == RiskLevel::Critical {
        RiskAction::Block
    } else if level >= confirm_at {
        RiskAction::RequireConfirm
    } else if level == RiskLevel::Medium {
        RiskAction::Warn
    } else {
        RiskAction::Allow
    }
}
