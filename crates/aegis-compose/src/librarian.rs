//! The Librarian — tool selection.
//!
//! Selection is tiered, cheapest first:
//!
//! 1. A literal pre-filter scans the request for tool names and registry
//!    keywords with an [`aho_corasick`] automaton.  If every hit points at
//!    one tool, that tool wins without any model call.
//! 2. Otherwise the model is shown a numbered menu of the top search
//!    candidates and must reply with one index or `none`.  Temperature 0;
//!    an out-of-range reply is coerced to `none`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use aegis_llm::{Gateway, GatewayError, GenerateOptions, LlmError};
use aegis_registry::{RegistryStore, Role};

use crate::error::{ComposeError, Result};

/// Number of search candidates shown in the selection menu.
const MENU_SIZE: usize = 15;

/// Tiered tool selection over the registry.
pub struct Librarian {
    registry: Arc<RegistryStore>,
    gateway: Arc<Gateway>,
    /// Automaton over tool names and keywords; pattern index maps into
    /// `pattern_tools`.
    automaton: Option<AhoCorasick>,
    pattern_tools: Vec<String>,
}

impl Librarian {
    /// Build a librarian; the pre-filter automaton is compiled once from
    /// the selectable tools' names and keywords.
    pub fn new(registry: Arc<RegistryStore>, gateway: Arc<Gateway>) -> Self {
        let mut patterns: Vec<String> = Vec::new();
        let mut pattern_tools: Vec<String> = Vec::new();

        let mut selectable: HashSet<&str> =
            registry.selectable_names().into_iter().collect();
        for summary in registry.summaries() {
            if !selectable.remove(summary.name.as_str()) {
                continue;
            }
            patterns.push(summary.name.to_lowercase());
            pattern_tools.push(summary.name.clone());
            for keyword in &summary.keywords {
                patterns.push(keyword.to_lowercase());
                pattern_tools.push(summary.name.clone());
            }
        }

        let automaton = if patterns.is_empty() {
            None
        } else {
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .ascii_case_insensitive(true)
                .build(&patterns)
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to build pre-filter automaton");
                    e
                })
                .ok()
        };

        Self {
            registry,
            gateway,
            automaton,
            pattern_tools,
        }
    }

    /// Pick a tool for a free-text request.
    pub async fn select(&self, request: &str, role: Role) -> Result<String> {
        if let Some(tool) = self.prefilter(request) {
            tracing::debug!(tool = %tool, "pre-filter selected tool without model");
            return Ok(tool);
        }

        self.select_via_menu(request, role).await
    }

    /// Literal scan for tool names and keywords.  Returns a tool only when
    /// all whole-word hits agree on it.
    fn prefilter(&self, request: &str) -> Option<String> {
        let automaton = self.automaton.as_ref()?;
        let lowered = request.to_lowercase();

        let mut tools: HashSet<&str> = HashSet::new();
        for mat in automaton.find_overlapping_iter(&lowered) {
            if !is_whole_word(&lowered, mat.start(), mat.end()) {
                continue;
            }
            tools.insert(self.pattern_tools[mat.pattern().as_usize()].as_str());
        }

        if tools.len() == 1 {
            tools.into_iter().next().map(str::to_owned)
        } else {
            None
        }
    }

    /// Model-driven selection from a numbered candidate menu.
    async fn select_via_menu(&self, request: &str, role: Role) -> Result<String> {
        let candidates = self.registry.search(request, role, MENU_SIZE);
        if candidates.is_empty() {
            return Err(ComposeError::NoToolFound);
        }

        let menu: String = candidates
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("{i}. {} ({})", hit.name, hit.category))
            .collect::<Vec<_>>()
            .join("\n");

        let bindings = HashMap::from([
            ("request".to_string(), request.to_string()),
            ("role".to_string(), role.to_string()),
            ("menu".to_string(), menu),
            (
                "max_index".to_string(),
                (candidates.len() - 1).to_string(),
            ),
        ]);

        let reply = self
            .gateway
            .generate("selection", &bindings, GenerateOptions::deterministic())
            .await
            .map_err(map_gateway_error)?;

        match parse_menu_reply(&reply, candidates.len()) {
            Some(index) => {
                let tool = candidates[index].name.clone();
                tracing::debug!(tool = %tool, index, "model selected tool from menu");
                Ok(tool)
            }
            None => Err(ComposeError::NoToolFound),
        }
    }
}

impl std::fmt::Debug for Librarian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Librarian")
            .field("patterns", &self.pattern_tools.len())
            .finish()
    }
}

/// Whether the span `[start, end)` in `text` is delimited by non-word
/// characters, so `scan` does not fire inside `scanning`.
fn is_whole_word(text: &str, start: usize, end: usize) -> bool {
    let before_ok = start == 0
        || text[..start]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_alphanumeric() && c != '_');
    let after_ok = end == text.len()
        || text[end..]
            .chars()
            .next()
            .is_some_and(|c| !c.is_alphanumeric() && c != '_');
    before_ok && after_ok
}

/// Parse the model's menu reply: a bare index, or `none`.  Anything else,
/// including an out-of-range index, coerces to `None`.
fn parse_menu_reply(reply: &str, menu_len: usize) -> Option<usize> {
    let cleaned = reply.trim().trim_end_matches('.');
    if cleaned.eq_ignore_ascii_case("none") {
        return None;
    }
    cleaned
        .parse::<usize>()
        .ok()
        .filter(|&index| index < menu_len)
}

pub(crate) fn map_gateway_error(e: GatewayError) -> ComposeError {
    match e {
        GatewayError::Llm(LlmError::Timeout { deadline_ms }) => ComposeError::LlmUnavailable {
            reason: format!("timed out after {deadline_ms} ms"),
        },
        GatewayError::Llm(err) => ComposeError::LlmUnavailable {
            reason: err.to_string(),
        },
        GatewayError::TemplateMissing { name } => ComposeError::LlmUnavailable {
            reason: format!("template missing: {name}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_reply_parses_index() {
        assert_eq!(parse_menu_reply("3", 10), Some(3));
        assert_eq!(parse_menu_reply(" 0.\n", 10), Some(0));
    }

    #[test]
    fn menu_reply_none_and_garbage() {
        assert_eq!(parse_menu_reply("none", 10), None);
        assert_eq!(parse_menu_reply("NONE", 10), None);
        assert_eq!(parse_menu_reply("the third one", 10), None);
    }

    #[test]
    fn menu_reply_out_of_range_coerced_to_none() {
        assert_eq!(parse_menu_reply("15", 15), None);
        assert_eq!(parse_menu_reply("99", 3), None);
    }

    #[test]
    fn whole_word_boundaries() {
        let text = "please scan the scanning host";
        let start = text.find("scan").unwrap();
        assert!(is_whole_word(text, start, start + 4));

        let inner = text.find("scanning").unwrap();
        assert!(!is_whole_word(text, inner, inner + 4));
    }
}
