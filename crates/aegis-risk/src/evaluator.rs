//! Two-layer risk evaluation.
//!
//! Layer one is the static pattern database: every compiled pattern is
//! evaluated against the command string and the highest-severity match
//! wins.  A `block` pattern short-circuits the whole evaluation.  Layer
//! two asks the model to judge the command in context (role, recent tool
//! uses) and the two levels are merged by ordinal maximum.
//!
//! The evaluator never fails: any problem with the contextual pass
//! degrades the verdict to static-only with `degraded = true`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use aegis_llm::{Gateway, GenerateOptions, extract_json};
use aegis_registry::{RegistryStore, RiskAction, RiskLevel, Role};

use crate::verdict::{Verdict, action_for_level};

/// Session context the evaluator reads (and never mutates).
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    /// The session's role, passed through to the contextual prompt.
    pub role: Role,
    /// Names of recently used tools, most recent first.
    pub recent_tools: Vec<String>,
}

/// The contextual pass's expected reply shape.
#[derive(Debug, Deserialize)]
struct ContextualReply {
    level: RiskLevel,
    #[serde(default)]
    reason: String,
}

/// Outcome of the static pass, kept for merging.
struct StaticVerdict {
    level: RiskLevel,
    pattern: Option<String>,
    alternatives: Vec<String>,
    blocked: bool,
    reason: String,
}

/// Static pattern matching plus contextual LLM judgement.
pub struct RiskEvaluator {
    registry: Arc<RegistryStore>,
    gateway: Arc<Gateway>,
    /// Severity at which execution requires explicit confirmation.
    confirm_at: RiskLevel,
}

impl RiskEvaluator {
    /// Create an evaluator with the given confirmation threshold.
    pub fn new(registry: Arc<RegistryStore>, gateway: Arc<Gateway>, confirm_at: RiskLevel) -> Self {
        Self {
            registry,
            gateway,
            confirm_at,
        }
    }

    /// Produce a verdict for a candidate command string.
    ///
    /// Deterministic given identical inputs and model responses.  Never
    /// returns an error; contextual failures degrade to static-only.
    pub async fn evaluate(&self, command: &str, ctx: &RiskContext) -> Verdict {
        let command = command.trim();
        if command.is_empty() {
            return Verdict::blocked("empty command");
        }

        let stat = self.static_pass(command);

        // A blocking pattern is final; the model never gets a say.
        if stat.blocked {
            tracing::info!(
                command = command,
                pattern = stat.pattern.as_deref().unwrap_or(""),
                "command blocked by static pattern"
            );
            return Verdict {
                level: stat.level,
                action: RiskAction::Block,
                reason: stat.reason,
                pattern: stat.pattern,
                alternatives: stat.alternatives,
                degraded: false,
            };
        }

        match self.contextual_pass(command, ctx).await {
            Ok(reply) => {
                let merged = stat.level.max(reply.level);
                let action = action_for_level(merged, self.confirm_at);
                tracing::debug!(
                    command = command,
                    static_level = %stat.level,
                    contextual_level = %reply.level,
                    merged = %merged,
                    action = %action,
                    "risk verdict merged"
                );
                Verdict {
                    level: merged,
                    action,
                    reason: if reply.reason.is_empty() {
                        stat.reason
                    } else {
                        reply.reason
                    },
                    pattern: stat.pattern,
                    alternatives: stat.alternatives,
                    degraded: false,
                }
            }
            Err(cause) => {
                tracing::warn!(
                    command = command,
                    cause = %cause,
                    "contextual risk pass unavailable, degrading to static verdict"
                );
                let action = action_for_level(stat.level, self.confirm_at);
                Verdict {
                    level: stat.level,
                    action,
                    reason: format!("{} (contextual pass unavailable: {cause})", stat.reason),
                    pattern: stat.pattern,
                    alternatives: stat.alternatives,
                    degraded: true,
                }
            }
        }
    }

    /// Evaluate every compiled pattern; the highest severity wins, ties
    /// broken by file order.  The pattern list is pre-sorted by the
    /// registry, so the first match is the winner.
    fn static_pass(&self, command: &str) -> StaticVerdict {
        for pattern in self.registry.patterns() {
            if pattern.is_match(command) {
                let entry = &pattern.entry;
                return StaticVerdict {
                    level: entry.level,
                    pattern: Some(entry.description.clone()),
                    alternatives: entry.alternatives.clone(),
                    blocked: entry.action == RiskAction::Block,
                    reason: entry.description.clone(),
                };
            }
        }

        StaticVerdict {
            level: RiskLevel::Safe,
            pattern: None,
            alternatives: Vec::new(),
            blocked: false,
            reason: "no risk pattern matched".into(),
        }
    }

    /// Ask the model for a contextual severity judgement.
    async fn contextual_pass(
        &self,
        command: &str,
        ctx: &RiskContext,
    ) -> Result<ContextualReply, String> {
        let bindings = HashMap::from([
            ("command".to_string(), command.to_string()),
            ("role".to_string(), ctx.role.to_string()),
            ("recent_tools".to_string(), ctx.recent_tools.join(", ")),
        ]);

        let text = self
            .gateway
            .generate("risk", &bindings, GenerateOptions::default())
            .await
            .map_err(|e| e.to_string())?;

        serde_json::from_str::<ContextualReply>(extract_json(&text))
            .map_err(|e| format!("unparseable model reply: {e}"))
    }
}

impl std::fmt::Debug for RiskEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEvaluator")
            .field("confirm_at", &self.confirm_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use aegis_llm::{
        CompletionClient, CompletionRequest, GatewayConfig, LlmError, Result as LlmResult,
    };
    use aegis_registry::RegistryPaths;

    struct Scripted(std::sync::Mutex<Vec<LlmResult<String>>>);

    impl Scripted {
        fn new(responses: Vec<LlmResult<String>>) -> Self {
            Self(std::sync::Mutex::new(responses))
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> LlmResult<String> {
            let mut r = self.0.lock().unwrap();
            if r.is_empty() {
                Err(LlmError::Unavailable {
                    reason: "script exhausted".into(),
                })
            } else {
                r.remove(0)
            }
        }
    }

    fn registry() -> Arc<RegistryStore> {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("tools")).unwrap();
        std::fs::create_dir_all(root.join("prompts")).unwrap();
        std::fs::write(root.join("tools.json"), r#"{"tools": []}"#).unwrap();
        std::fs::write(
            root.join("risk_patterns.json"),
            r#"{"patterns": [
                {"pattern": "^rm\\s+-rf\\s+/", "level": "critical",
                 "description": "recursive filesystem wipe", "action": "block",
                 "alternatives": ["rm -i specific/path"]},
                {"pattern": "\\bdd\\b.*of=/dev/", "level": "high",
                 "description": "raw write to a block device", "action": "require_confirm"},
                {"pattern": "nmap.*-T5", "level": "medium",
                 "description": "aggressive scan timing", "action": "warn"}
            ]}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("prompts/risk.txt"),
            "Judge {command} for {role} given recent tools {recent_tools}",
        )
        .unwrap();
        Arc::new(RegistryStore::load(RegistryPaths::under_root(root)).unwrap())
    }

    fn evaluator(responses: Vec<LlmResult<String>>) -> RiskEvaluator {
        let registry = registry();
        let gateway = Arc::new(Gateway::new(
            Arc::new(Scripted::new(responses)),
            registry.clone(),
            GatewayConfig {
                retry_attempts: 1,
                ..GatewayConfig::default()
            },
        ));
        RiskEvaluator::new(registry, gateway, RiskLevel::High)
    }

    #[tokio::test]
    async fn empty_command_is_blocked() {
        let eval = evaluator(vec![]);
        let verdict = eval.evaluate("   ", &RiskContext::default()).await;
        assert_eq!(verdict.action, RiskAction::Block);
        assert!(verdict.reason.contains("empty command"));
    }

    #[tokio::test]
    async fn block_pattern_short_circuits() {
        // The script would answer "safe", but the static block must win
        // without the model ever being consulted.
        let eval = evaluator(vec![Ok(r#"{"level": "safe", "reason": "fine"}"#.into())]);
        let verdict = eval.evaluate("rm -rf /", &RiskContext::default()).await;

        assert_eq!(verdict.level, RiskLevel::Critical);
        assert_eq!(verdict.action, RiskAction::Block);
        assert!(!verdict.degraded);
        assert_eq!(
            verdict.alternatives,
            vec!["rm -i specific/path".to_string()]
        );
    }

    #[tokio::test]
    async fn merge_takes_ordinal_max() {
        // Static says medium (nmap -T5); model says high.
        let eval = evaluator(vec![Ok(
            r#"{"level": "high", "reason": "external target"}"#.into()
        )]);
        let verdict = eval
            .evaluate("nmap -T5 10.0.0.1", &RiskContext::default())
            .await;

        assert_eq!(verdict.level, RiskLevel::High);
        assert_eq!(verdict.action, RiskAction::RequireConfirm);
        assert_eq!(verdict.reason, "external target");
        assert_eq!(verdict.pattern.as_deref(), Some("aggressive scan timing"));
    }

    #[tokio::test]
    async fn contextual_cannot_lower_static_level() {
        let eval = evaluator(vec![Ok(r#"{"level": "safe", "reason": "looks ok"}"#.into())]);
        let verdict = eval
            .evaluate("nmap -T5 10.0.0.1", &RiskContext::default())
            .await;
        assert_eq!(verdict.level, RiskLevel::Medium);
        assert_eq!(verdict.action, RiskAction::Warn);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_static() {
        let eval = evaluator(vec![Err(LlmError::QuotaExceeded)]);
        let verdict = eval
            .evaluate("nmap -T5 10.0.0.1", &RiskContext::default())
            .await;

        assert!(verdict.degraded);
        assert_eq!(verdict.level, RiskLevel::Medium);
        assert!(verdict.reason.contains("contextual pass unavailable"));
    }

    #[tokio::test]
    async fn unparseable_reply_degrades_to_static() {
        let eval = evaluator(vec![Ok("I think it is probably fine".into())]);
        let verdict = eval
            .evaluate("echo hello", &RiskContext::default())
            .await;

        assert!(verdict.degraded);
        assert_eq!(verdict.level, RiskLevel::Safe);
        assert_eq!(verdict.action, RiskAction::Allow);
    }

    #[tokio::test]
    async fn fenced_reply_is_accepted() {
        let eval = evaluator(vec![Ok(
            "```json\n{\"level\": \"low\", \"reason\": \"local target\"}\n```".into(),
        )]);
        let verdict = eval
            .evaluate("echo hello", &RiskContext::default())
            .await;

        assert!(!verdict.degraded);
        assert_eq!(verdict.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn adding_patterns_never_lowers_verdict() {
        // Risk monotonicity: with the pattern DB in place, a command that
        // matches nothing is Safe; the same command judged by the model
        // alone cannot come out below the static floor.
        let eval = evaluator(vec![Ok(r#"{"level": "low", "reason": "benign"}"#.into())]);
        let verdict = eval.evaluate("echo hello", &RiskContext::default()).await;
        assert_eq!(verdict.level, RiskLevel::Low);
        assert!(verdict.level >= RiskLevel::Safe);
    }
}
