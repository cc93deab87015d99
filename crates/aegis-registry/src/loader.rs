//! Registry loading — reads tool registries, risk patterns, and prompt
//! templates from a configured directory at startup.
//!
//! Layout under the registry root:
//!
//! ```text
//! tools.json            master registry (names, categories, keywords)
//! tools/<name>.json     detailed per-tool registry
//! risk_patterns.json    risk pattern database (fatal if unusable)
//! prompts/<name>.txt    prompt templates
//! ```
//!
//! A missing or malformed per-tool registry is logged and that tool is
//! marked unselectable; startup continues.  A missing risk-pattern file is
//! fatal: the safety floor must exist.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{RegistryError, Result};
use crate::template::PromptTemplate;
use crate::types::{RiskPattern, RiskPatternEntry, ToolSpec, ToolSummary};

/// A tool as held in memory: always a master-registry row, and a detail
/// spec when its per-tool registry loaded cleanly.
#[derive(Debug, Clone)]
pub struct LoadedTool {
    pub summary: ToolSummary,
    /// `None` when the per-tool registry was missing or malformed; the
    /// tool is then unselectable.
    pub spec: Option<ToolSpec>,
    /// Why the detail failed to load, for diagnostics.
    pub unavailable_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MasterFile {
    tools: Vec<ToolSummary>,
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    patterns: Vec<RiskPatternEntry>,
}

/// Load the master registry and all per-tool registries.
pub fn load_tools(master_path: &Path, per_tool_dir: &Path) -> Result<HashMap<String, LoadedTool>> {
    let raw = std::fs::read_to_string(master_path).map_err(|e| RegistryError::LoadFailed {
        path: master_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let master: MasterFile =
        serde_json::from_str(&raw).map_err(|e| RegistryError::LoadFailed {
            path: master_path.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut tools = HashMap::with_capacity(master.tools.len());

    for summary in master.tools {
        let detail_path = per_tool_dir.join(format!("{}.json", summary.name));
        let (spec, unavailable_reason) = match load_tool_spec(&detail_path, &summary.name) {
            Ok(spec) => (Some(spec), None),
            Err(e) => {
                tracing::warn!(
                    tool = %summary.name,
                    path = %detail_path.display(),
                    error = %e,
                    "per-tool registry unusable, marking tool unselectable"
                );
                (None, Some(e.to_string()))
            }
        };

        tools.insert(
            summary.name.clone(),
            LoadedTool {
                summary,
                spec,
                unavailable_reason,
            },
        );
    }

    tracing::info!(
        count = tools.len(),
        selectable = tools.values().filter(|t| t.spec.is_some()).count(),
        "tool registries loaded"
    );

    Ok(tools)
}

/// Load and sanity-check a single per-tool registry file.
fn load_tool_spec(path: &Path, expected_name: &str) -> Result<ToolSpec> {
    let raw = std::fs::read_to_string(path).map_err(|e| RegistryError::LoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let spec: ToolSpec = serde_json::from_str(&raw).map_err(|e| RegistryError::LoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if spec.name != expected_name {
        return Err(RegistryError::LoadFailed {
            path: path.display().to_string(),
            reason: format!(
                "registry name `{}` does not match filename `{expected_name}`",
                spec.name
            ),
        });
    }
    if spec.base_command.is_empty() {
        return Err(RegistryError::LoadFailed {
            path: path.display().to_string(),
            reason: "empty base_command".into(),
        });
    }

    // Validator regexes must compile now, not at composition time.
    for slot in &spec.parameters {
        if let Some(validator) = &slot.validator {
            regex::Regex::new(validator).map_err(|e| RegistryError::LoadFailed {
                path: path.display().to_string(),
                reason: format!("slot `{}` validator: {e}", slot.name),
            })?;
        }
    }

    Ok(spec)
}

/// Load and compile the risk-pattern database.
///
/// Patterns are sorted by descending severity so the first match dominates;
/// ties keep their file order.  Any failure here is fatal.
pub fn load_patterns(path: &Path) -> Result<Vec<RiskPattern>> {
    let raw = std::fs::read_to_string(path).map_err(|e| RegistryError::RiskDbUnusable {
        reason: format!("{}: {e}", path.display()),
    })?;
    let file: PatternFile =
        serde_json::from_str(&raw).map_err(|e| RegistryError::RiskDbUnusable {
            reason: format!("{}: {e}", path.display()),
        })?;

    if file.patterns.is_empty() {
        return Err(RegistryError::RiskDbUnusable {
            reason: "pattern database is empty".into(),
        });
    }

    let mut patterns = Vec::with_capacity(file.patterns.len());
    for entry in file.patterns {
        let compiled =
            regex::Regex::new(&entry.pattern).map_err(|e| RegistryError::InvalidPattern {
                pattern: entry.pattern.clone(),
                reason: e.to_string(),
            })?;
        patterns.push(RiskPattern { entry, compiled });
    }

    // Stable sort keeps file order within a severity tier.
    patterns.sort_by(|a, b| b.entry.level.cmp(&a.entry.level));

    tracing::info!(count = patterns.len(), "risk patterns compiled");
    Ok(patterns)
}

/// Load all prompt templates from a directory of `.txt` files.
pub fn load_templates(dir: &Path) -> Result<HashMap<String, PromptTemplate>> {
    let mut templates = HashMap::new();

    let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::LoadFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path)?;
        templates.insert(stem.to_owned(), PromptTemplate::new(stem, text));
    }

    tracing::info!(count = templates.len(), dir = %dir.display(), "prompt templates loaded");
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskAction, RiskLevel};

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_per_tool_registry_marks_unselectable() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("tools.json"),
            r#"{"tools": [
                {"name": "nmap", "category": "network_scanning", "risk_baseline": "low", "keywords": ["scan"]},
                {"name": "ghost", "category": "misc", "risk_baseline": "safe", "keywords": []}
            ]}"#,
        );
        write(
            &tmp.path().join("tools/nmap.json"),
            r#"{"name": "nmap", "base_command": "nmap", "category": "network_scanning",
                "risk_baseline": "low", "keywords": ["scan"], "parameters": []}"#,
        );

        let tools = load_tools(&tmp.path().join("tools.json"), &tmp.path().join("tools")).unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools["nmap"].spec.is_some());
        assert!(tools["ghost"].spec.is_none());
        assert!(tools["ghost"].unavailable_reason.is_some());
    }

    #[test]
    fn mismatched_tool_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("tools.json"),
            r#"{"tools": [{"name": "nmap", "category": "x", "risk_baseline": "low"}]}"#,
        );
        write(
            &tmp.path().join("tools/nmap.json"),
            r#"{"name": "masscan", "base_command": "masscan", "category": "x",
                "risk_baseline": "low"}"#,
        );

        let tools = load_tools(&tmp.path().join("tools.json"), &tmp.path().join("tools")).unwrap();
        assert!(tools["nmap"].spec.is_none());
    }

    #[test]
    fn invalid_validator_regex_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            &tmp.path().join("tools.json"),
            r#"{"tools": [{"name": "t", "category": "x", "risk_baseline": "safe"}]}"#,
        );
        write(
            &tmp.path().join("tools/t.json"),
            r#"{"name": "t", "base_command": "t", "category": "x", "risk_baseline": "safe",
                "parameters": [{"name": "p", "kind": "positional", "requires_value": true,
                                "validator": "[unclosed"}]}"#,
        );

        let tools = load_tools(&tmp.path().join("tools.json"), &tmp.path().join("tools")).unwrap();
        assert!(tools["t"].spec.is_none());
    }

    #[test]
    fn missing_pattern_db_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let result = load_patterns(&tmp.path().join("risk_patterns.json"));
        assert!(matches!(result, Err(RegistryError::RiskDbUnusable { .. })));
    }

    #[test]
    fn patterns_sorted_by_descending_severity() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("risk_patterns.json");
        write(
            &path,
            r#"{"patterns": [
                {"pattern": "mid", "level": "medium", "description": "m", "action": "warn"},
                {"pattern": "crit", "level": "critical", "description": "c", "action": "block"},
                {"pattern": "lo", "level": "low", "description": "l", "action": "allow"}
            ]}"#,
        );

        let patterns = load_patterns(&path).unwrap();
        assert_eq!(patterns[0].entry.level, RiskLevel::Critical);
        assert_eq!(patterns[0].entry.action, RiskAction::Block);
        assert_eq!(patterns[2].entry.level, RiskLevel::Low);
    }

    #[test]
    fn empty_pattern_db_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("risk_patterns.json");
        write(&path, r#"{"patterns": []}"#);
        assert!(load_patterns(&path).is_err());
    }

    #[test]
    fn templates_loaded_by_stem() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("prompts/triage.txt"), "classify: {input}");
        write(&tmp.path().join("prompts/notes.md"), "ignored");

        let templates = load_templates(&tmp.path().join("prompts")).unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates.contains_key("triage"));
    }
}
