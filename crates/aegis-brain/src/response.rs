//! Public response shapes.
//!
//! Every pipeline outcome maps to one of these tagged values; no internal
//! error escapes the orchestrator boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_risk::Verdict;

/// The response union returned by request processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Plain conversational reply.
    Conversation { message: String },

    /// Topic explanation.
    Explanation { message: String },

    /// A composed command preview (possibly auto-executed, possibly with
    /// ranked alternatives in suggester mode).
    Command(CommandView),

    /// A multi-step plan; each step is re-entered on explicit approval.
    Plan { plan: PlanView },

    /// Reportable failure.
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl Response {
    pub fn error(error: impl Into<String>, code: &str) -> Self {
        Self::Error {
            error: error.into(),
            code: Some(code.to_owned()),
        }
    }
}

/// A composed command with its risk verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandView {
    pub tool_name: String,
    pub argv: Vec<String>,
    pub explanation: String,
    pub risk: Verdict,

    /// Set when quick mode auto-executed the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,

    /// Ranked alternatives (suggester mode only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<SuggestionView>,
}

/// One ranked alternative in suggester mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionView {
    pub argv: Vec<String>,
    pub explanation: String,
}

/// A parsed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanView {
    pub goal: String,
    pub steps: Vec<PlanStepView>,
}

/// One plan step.  `tool_request` is re-entered as a sub-request on user
/// approval; steps never cascade automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepView {
    pub n: u32,
    pub description: String,
    pub tool_request: String,
    #[serde(default)]
    pub expected_outcome: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_registry::{RiskAction, RiskLevel};

    #[test]
    fn conversation_frame() {
        let json = serde_json::to_value(Response::Conversation {
            message: "hello".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "conversation");
        assert_eq!(json["message"], "hello");
    }

    #[test]
    fn command_frame_includes_risk() {
        let response = Response::Command(CommandView {
            tool_name: "nmap".into(),
            argv: vec!["nmap".into(), "-sS".into(), "127.0.0.1".into()],
            explanation: "SYN scan".into(),
            risk: Verdict {
                level: RiskLevel::Low,
                action: RiskAction::Allow,
                reason: "local target".into(),
                pattern: None,
                alternatives: vec![],
                degraded: false,
            },
            execution_id: None,
            suggestions: vec![],
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["argv"][0], "nmap");
        assert_eq!(json["risk"]["level"], "low");
        assert_eq!(json["risk"]["action"], "allow");
        // Optional fields are omitted entirely.
        assert!(json.get("execution_id").is_none());
        assert!(json.get("suggestions").is_none());
    }

    #[test]
    fn error_frame_carries_code() {
        let json = serde_json::to_value(Response::error("empty input", "input_error")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "input_error");
    }

    #[test]
    fn plan_frame_shape() {
        let response = Response::Plan {
            plan: PlanView {
                goal: "audit the web server".into(),
                steps: vec![PlanStepView {
                    n: 1,
                    description: "scan ports".into(),
                    tool_request: "scan ports on target".into(),
                    expected_outcome: "open port list".into(),
                }],
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["plan"]["steps"][0]["n"], 1);
    }
}
