//! The composer facade: Librarian then Scholar.

use std::sync::Arc;

use aegis_llm::Gateway;
use aegis_registry::{RegistryStore, Role};

use crate::error::{ComposeError, Result};
use crate::librarian::Librarian;
use crate::scholar::{ComposedCommand, Scholar, Suggestion};

/// End-to-end composition: pick the tool, then build its argv.
pub struct Composer {
    registry: Arc<RegistryStore>,
    librarian: Librarian,
    scholar: Scholar,
}

impl Composer {
    pub fn new(registry: Arc<RegistryStore>, gateway: Arc<Gateway>) -> Self {
        let librarian = Librarian::new(registry.clone(), gateway.clone());
        let scholar = Scholar::new(gateway);
        Self {
            registry,
            librarian,
            scholar,
        }
    }

    /// Compose a single command from free text.
    pub async fn compose(
        &self,
        request: &str,
        role: Role,
        recent_output: Option<&str>,
    ) -> Result<ComposedCommand> {
        let tool = self.librarian.select(request, role).await?;
        let spec = self
            .registry
            .lookup(&tool)
            .map_err(|_| ComposeError::NoToolFound)?;
        self.scholar.compose(spec, request, role, recent_output).await
    }

    /// Compose up to three ranked alternatives from free text.
    pub async fn compose_alternatives(
        &self,
        request: &str,
        role: Role,
    ) -> Result<(String, Vec<Suggestion>)> {
        let tool = self.librarian.select(request, role).await?;
        let spec = self
            .registry
            .lookup(&tool)
            .map_err(|_| ComposeError::NoToolFound)?;
        let suggestions = self.scholar.alternatives(spec, request, role).await?;
        Ok((tool, suggestions))
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer").finish()
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

    /// A registry with nmap (keywords scan/ports) and gobuster (keywords
    /// directories/wordlist), detailed entries for both.
    fn registry() -> Arc<RegistryStore> {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("tools")).unwrap();
        std::fs::create_dir_all(root.join("prompts")).unwrap();
        std::fs::write(
            root.join("tools.json"),
            r#"{"tools": [
                {"name": "nmap", "category": "network_scanning", "risk_baseline": "low",
                 "keywords": ["scan", "ports", "hosts"]},
                {"name": "gobuster", "category": "web_enumeration", "risk_baseline": "medium",
                 "keywords": ["directories", "wordlist", "brute"]}
            ]}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("tools/nmap.json"),
            r#"{"name": "nmap", "base_command": "nmap", "category": "network_scanning",
                "risk_baseline": "low", "keywords": ["scan", "ports"],
                "parameters": [
                    {"name": "syn_scan", "kind": "flag", "flag": "-sS"},
                    {"name": "timing", "kind": "flag", "flag": "-T4"},
                    {"name": "target", "kind": "positional", "requires_value": true,
                     "required": true, "aliases": ["host"],
                     "validator": "(\\d{1,3}\\.){3}\\d{1,3}|localhost"}
                ]}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("tools/gobuster.json"),
            r#"{"name": "gobuster", "base_command": "gobuster", "category": "web_enumeration",
                "risk_baseline": "medium", "keywords": ["directories"],
                "parameters": [
                    {"name": "mode", "kind": "positional", "requires_value": true,
                     "required": true},
                    {"name": "url", "kind": "flag", "flag": "-u", "requires_value": true,
                     "required": true},
                    {"name": "wordlist", "kind": "flag", "flag": "-w", "requires_value": true,
                     "default": "/usr/share/wordlists/common.txt"}
                ]}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("risk_patterns.json"),
            r#"{"patterns": [{"pattern": "^rm\\s+-rf\\s+/", "level": "critical",
                              "description": "fs wipe", "action": "block"}]}"#,
        )
        .unwrap();
        for name in ["selection", "command", "suggest"] {
            std::fs::write(
                root.join(format!("prompts/{name}.txt")),
                "{request} {role}",
            )
            .unwrap();
        }
        Arc::new(RegistryStore::load(RegistryPaths::under_root(root)).unwrap())
    }

    fn composer(responses: Vec<LlmResult<String>>) -> Composer {
        let registry = registry();
        let gateway = Arc::new(Gateway::new(
            Arc::new(Scripted(std::sync::Mutex::new(responses))),
            registry.clone(),
            GatewayConfig {
                retry_attempts: 1,
                ..GatewayConfig::default()
            },
        ));
        Composer::new(registry, gateway)
    }

    #[tokio::test]
    async fn prefilter_skips_selection_call() {
        // "scan ports" hits only nmap keywords, so the only scripted reply
        // is the Scholar's command object; no selection call happens.
        let composer = composer(vec![Ok(
            r#"{"argv": ["nmap", "-sS", "-T4", "127.0.0.1"],
                "explanation": "SYN scan"}"#
                .into(),
        )]);

        let cmd = composer
            .compose("scan ports on 127.0.0.1", Role::Student, None)
            .await
            .unwrap();
        assert_eq!(cmd.tool, "nmap");
        assert_eq!(cmd.argv, vec!["nmap", "-sS", "-T4", "127.0.0.1"]);
    }

    #[tokio::test]
    async fn ambiguous_request_goes_through_menu() {
        // "scan directories" hits both tools' keywords, forcing the menu.
        // nmap outscores gobuster ("scan" hits its keyword and category),
        // so the menu lists nmap at 0 and gobuster at 1; the model picks 1.
        let composer = composer(vec![
            Ok("1".into()),
            Ok(r#"{"argv": ["gobuster", "dir", "-u", "http://example.com"],
                   "explanation": "directory scan"}"#
                .into()),
        ]);

        let cmd = composer
            .compose("scan directories on the site", Role::PenTester, None)
            .await
            .unwrap();
        assert_eq!(cmd.tool, "gobuster");
    }

    #[tokio::test]
    async fn menu_none_reply_is_no_tool() {
        let composer = composer(vec![Ok("none".into())]);
        let err = composer
            .compose("scan directories please", Role::Student, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::NoToolFound));
    }

    #[tokio::test]
    async fn unmatched_request_is_no_tool() {
        let composer = composer(vec![]);
        let err = composer
            .compose("write me a poem about summer", Role::Student, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::NoToolFound));
    }

    #[tokio::test]
    async fn llm_outage_with_literal_target_composes_from_registry() {
        // Selection and composition both have deterministic paths when
        // the request carries a literal target.
        let composer = composer(vec![Err(LlmError::Timeout { deadline_ms: 100 })]);
        let cmd = composer
            .compose("scan ports on 127.0.0.1", Role::Student, None)
            .await
            .unwrap();
        assert_eq!(cmd.argv, vec!["nmap", "127.0.0.1"]);
    }

    #[tokio::test]
    async fn llm_outage_without_target_is_unavailable() {
        // Selection is deterministic, but composition can extract no
        // target; the outage surfaces as LlmUnavailable.
        let composer = composer(vec![Err(LlmError::Timeout { deadline_ms: 100 })]);
        let err = composer
            .compose("scan the open ports please", Role::Student, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::LlmUnavailable { .. }));
    }

    #[tokio::test]
    async fn alternatives_via_prefilter() {
        let composer = composer(vec![Ok(r#"[
            {"argv": ["nmap", "-sS", "10.0.0.1"], "explanation": "stealth"},
            {"argv": ["nmap", "-T4", "10.0.0.1"], "explanation": "fast"}
        ]"#
        .into())]);

        let (tool, suggestions) = composer
            .compose_alternatives("scan ports on 10.0.0.1", Role::PenTester)
            .await
            .unwrap();
        assert_eq!(tool, "nmap");
        assert_eq!(suggestions.len(), 2);
    }
}
