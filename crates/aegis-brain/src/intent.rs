//! Intent classification.
//!
//! The triage prompt asks the model to reply with exactly one intent
//! name.  Parsing is forgiving about whitespace and stray punctuation,
//! but an unknown reply always degrades to `general_conversation`.

use serde::{Deserialize, Serialize};

/// The fixed intent taxonomy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    GeneralConversation,
    ExplanationRequest,
    ToolRequest,
    CommandRequest,
    PlanRequest,
    SystemOperation,
    TroubleshootingRequest,
    ForensicsRequest,
    NetworkAnalysis,
    AutomationRequest,
}

impl Intent {
    pub const ALL: [Intent; 10] = [
        Intent::GeneralConversation,
        Intent::ExplanationRequest,
        Intent::ToolRequest,
        Intent::CommandRequest,
        Intent::PlanRequest,
        Intent::SystemOperation,
        Intent::TroubleshootingRequest,
        Intent::ForensicsRequest,
        Intent::NetworkAnalysis,
        Intent::AutomationRequest,
    ];

    /// The wire name used in prompts, logs, and the session record.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::GeneralConversation => "general_conversation",
            Self::ExplanationRequest => "explanation_request",
            Self::ToolRequest => "tool_request",
            Self::CommandRequest => "command_request",
            Self::PlanRequest => "plan_request",
            Self::SystemOperation => "system_operation",
            Self::TroubleshootingRequest => "troubleshooting_request",
            Self::ForensicsRequest => "forensics_request",
            Self::NetworkAnalysis => "network_analysis",
            Self::AutomationRequest => "automation_request",
        }
    }

    /// Parse a triage reply.  Unknown replies are `GeneralConversation`.
    pub fn parse(reply: &str) -> Self {
        let cleaned = reply.trim().trim_matches(['`', '"', '\'', '.']).to_lowercase();

        for intent in Self::ALL {
            if cleaned == intent.wire_name() {
                return intent;
            }
        }
        // Tolerate replies that embed the name in a sentence.
        for intent in Self::ALL {
            if cleaned.contains(intent.wire_name()) {
                return intent;
            }
        }

        tracing::debug!(reply = reply, "unknown intent reply, defaulting to conversation");
        Self::GeneralConversation
    }

    /// Whether this intent routes to tool selection and composition.
    pub fn is_command_class(&self) -> bool {
        matches!(
            self,
            Self::ToolRequest
                | Self::CommandRequest
                | Self::NetworkAnalysis
                | Self::ForensicsRequest
        )
    }

    /// Whether this intent routes to the general chat prompt.
    pub fn is_chat_class(&self) -> bool {
        matches!(
            self,
            Self::GeneralConversation
                | Self::SystemOperation
                | Self::TroubleshootingRequest
                | Self::AutomationRequest
        )
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}
