//! The registry store — read-only after startup, shared via `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};
use crate::loader::{self, LoadedTool};
use crate::template::PromptTemplate;
use crate::types::{RiskPattern, Role, ToolSpec, ToolSummary};

/// A ranked hit from [`RegistryStore::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub category: String,
    pub score: u32,
}

/// Filesystem paths the store loads from.
#[derive(Debug, Clone)]
pub struct RegistryPaths {
    /// The master registry file (`tools.json`).
    pub tool_registry: PathBuf,
    /// Directory of detailed per-tool registry files.
    pub per_tool_registries: PathBuf,
    /// The risk-pattern database file.
    pub risk_patterns: PathBuf,
    /// Directory of prompt template `.txt` files.
    pub prompts: PathBuf,
}

impl RegistryPaths {
    /// Conventional layout with everything under one root directory.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            tool_registry: root.join("tools.json"),
            per_tool_registries: root.join("tools"),
            risk_patterns: root.join("risk_patterns.json"),
            prompts: root.join("prompts"),
        }
    }
}

/// Indexed tool registries, risk patterns, and prompt templates.
///
/// The store is immutable after [`RegistryStore::load`]; share it behind an
/// `Arc` and call [`RegistryStore::load`] again for a reload, swapping the
/// `Arc` at the owner.
pub struct RegistryStore {
    paths: RegistryPaths,
    tools: HashMap<String, LoadedTool>,
    patterns: Vec<RiskPattern>,
    templates: HashMap<String, PromptTemplate>,
}

impl RegistryStore {
    /// Load everything from disk.
    ///
    /// Per-tool registry failures degrade the affected tool to
    /// unselectable; a missing or malformed risk-pattern database is fatal.
    pub fn load(paths: RegistryPaths) -> Result<Self> {
        let tools = loader::load_tools(&paths.tool_registry, &paths.per_tool_registries)?;
        let patterns = loader::load_patterns(&paths.risk_patterns)?;
        let templates = loader::load_templates(&paths.prompts)?;

        Ok(Self {
            paths,
            tools,
            patterns,
            templates,
        })
    }

    /// Re-read every registry file from disk and return a fresh store.
    pub fn reload(&self) -> Result<Self> {
        Self::load(self.paths.clone())
    }

    /// O(1) lookup of a tool's detailed registry entry.
    pub fn lookup(&self, name: &str) -> Result<&ToolSpec> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::ToolNotFound { name: name.into() })?;
        tool.spec
            .as_ref()
            .ok_or_else(|| RegistryError::ToolUnavailable {
                name: name.into(),
                reason: tool
                    .unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "per-tool registry missing".into()),
            })
    }

    /// Master-registry rows for every known tool, selectable or not.
    pub fn summaries(&self) -> impl Iterator<Item = &ToolSummary> {
        self.tools.values().map(|t| &t.summary)
    }

    /// Names of all selectable tools, sorted ascending.
    pub fn selectable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .values()
            .filter(|t| t.spec.is_some())
            .map(|t| t.summary.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Keyword-weighted search over the master registry.
    ///
    /// Scoring is fixed and deterministic: exact name match 100, query term
    /// contained in the name 25, keyword hit 10 per matching keyword,
    /// category-name hit 5.  Ties break by role category affinity, then by
    /// ascending tool name.  Unselectable tools never appear.
    pub fn search(&self, query: &str, role: Role, limit: usize) -> Vec<SearchHit> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(SearchHit, bool)> = Vec::new();

        for tool in self.tools.values() {
            if tool.spec.is_none() {
                continue;
            }
            let summary = &tool.summary;
            let name = summary.name.to_lowercase();
            let category = summary.category.to_lowercase();

            let mut score = 0u32;
            for term in &terms {
                // Substring matching needs a minimum length, or filler
                // words like "a" light up half the registry.
                let fuzzy = term.len() >= 3;
                if *term == name {
                    score += 100;
                } else if fuzzy && (name.contains(term.as_str()) || term.contains(name.as_str())) {
                    score += 25;
                }
                if fuzzy && category.contains(term.as_str()) {
                    score += 5;
                }
                score += 10
                    * summary
                        .keywords
                        .iter()
                        .filter(|k| {
                            let k = k.to_lowercase();
                            k == *term || (fuzzy && term.contains(k.as_str()))
                        })
                        .count() as u32;
            }

            if score > 0 {
                let affine = role
                    .preferred_categories()
                    .contains(&summary.category.as_str());
                hits.push((
                    SearchHit {
                        name: summary.name.clone(),
                        category: summary.category.clone(),
                        score,
                    },
                    affine,
                ));
            }
        }

        hits.sort_by(|(a, a_affine), (b, b_affine)| {
            b.score
                .cmp(&a.score)
                .then_with(|| b_affine.cmp(a_affine))
                .then_with(|| a.name.cmp(&b.name))
        });

        hits.truncate(limit);
        hits.into_iter().map(|(hit, _)| hit).collect()
    }

    /// The compiled risk patterns, pre-sorted by descending severity.
    pub fn patterns(&self) -> &[RiskPattern] {
        &self.patterns
    }

    /// Fetch a prompt template by name.
    pub fn template(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| RegistryError::TemplateMissing { name: name.into() })
    }

    /// Names of all loaded templates (for startup diagnostics).
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("tools", &self.tools.len())
            .field("patterns", &self.patterns.len())
            .field("templates", &self.templates.len())
            .finish()
    }
}
