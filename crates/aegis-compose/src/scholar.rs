//! The Scholar — command composition.
//!
//! Given a selected tool and the user's request, renders the command
//! prompt with the tool's parameter table and parses the model's reply
//! into an argv vector.  Leftover `[PLACEHOLDER]` markers are filled from
//! registry defaults; the result is validated before it leaves the crate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use aegis_llm::{Gateway, GenerateOptions, extract_json};
use aegis_registry::{ParamKind, Role, ToolSpec};

use crate::error::{ComposeError, Result};
use crate::librarian::map_gateway_error;
use crate::validate::{fill_missing_defaults, validate_argv};

/// A validated, executable command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedCommand {
    /// The tool the argv belongs to.
    pub tool: String,
    /// The command vector; `argv[0]` is the tool's base command.
    pub argv: Vec<String>,
    /// One-line explanation of what the command does, when the model
    /// supplied one.
    pub explanation: String,
}

/// One ranked alternative for suggester mode.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub argv: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    argv: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    placeholders: Vec<String>,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct SuggestionReply {
    argv: Vec<String>,
    #[serde(default)]
    explanation: String,
}

/// Builds argv vectors for a selected tool.
pub struct Scholar {
    gateway: Arc<Gateway>,
}

impl Scholar {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Compose a single command for the tool.
    ///
    /// When the model is unreachable, composition falls back to a
    /// deterministic build from the registry: default-on flags plus
    /// positional values extracted from the request text.
    pub async fn compose(
        &self,
        spec: &ToolSpec,
        request: &str,
        role: Role,
        recent_output: Option<&str>,
    ) -> Result<ComposedCommand> {
        let bindings = self.command_bindings(spec, request, role, recent_output);

        let text = match self
            .gateway
            .generate("command", &bindings, GenerateOptions::deterministic())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    tool = %spec.name,
                    error = %e,
                    "model unavailable, composing from registry defaults"
                );
                return compose_fallback(spec, request).map_err(|fallback| {
                    tracing::debug!(error = %fallback, "fallback composition failed");
                    map_gateway_error(e)
                });
            }
        };

        let reply: CommandReply =
            serde_json::from_str(extract_json(&text)).map_err(|e| {
                ComposeError::ValidationFailed {
                    param: "argv".into(),
                    reason: format!("model reply was not a command object: {e}"),
                }
            })?;

        let argv = resolve_placeholders(spec, reply.argv)?;
        let argv = fill_missing_defaults(spec, argv);
        validate_argv(spec, &argv)?;

        tracing::debug!(tool = %spec.name, argv = ?argv, "command composed");

        Ok(ComposedCommand {
            tool: spec.name.clone(),
            argv,
            explanation: reply.explanation,
        })
    }

    /// Compose up to three ranked alternatives for suggester mode.
    ///
    /// Invalid entries are dropped rather than failing the whole call; an
    /// empty result maps to the same error a failed composition would.
    pub async fn alternatives(
        &self,
        spec: &ToolSpec,
        request: &str,
        role: Role,
    ) -> Result<Vec<Suggestion>> {
        let bindings = self.command_bindings(spec, request, role, None);

        let text = self
            .gateway
            .generate("suggest", &bindings, GenerateOptions::deterministic())
            .await
            .map_err(map_gateway_error)?;

        let replies: Vec<SuggestionReply> = serde_json::from_str(extract_json(&text))
            .map_err(|e| ComposeError::ValidationFailed {
                param: "suggestions".into(),
                reason: format!("model reply was not a suggestion array: {e}"),
            })?;

        let mut suggestions = Vec::new();
        for reply in replies {
            let argv = match resolve_placeholders(spec, reply.argv) {
                Ok(argv) => fill_missing_defaults(spec, argv),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping suggestion with unresolved placeholder");
                    continue;
                }
            };
            if let Err(e) = validate_argv(spec, &argv) {
                tracing::debug!(error = %e, "dropping invalid suggestion");
                continue;
            }
            suggestions.push(Suggestion {
                argv,
                explanation: reply.explanation,
            });
            if suggestions.len() == 3 {
                break;
            }
        }

        if suggestions.is_empty() {
            return Err(ComposeError::ValidationFailed {
                param: "suggestions".into(),
                reason: "no suggestion survived validation".into(),
            });
        }

        Ok(suggestions)
    }

    fn command_bindings(
        &self,
        spec: &ToolSpec,
        request: &str,
        role: Role,
        recent_output: Option<&str>,
    ) -> HashMap<String, String> {
        HashMap::from([
            ("request".to_string(), request.to_string()),
            ("role".to_string(), role.to_string()),
            ("tool".to_string(), spec.name.clone()),
            ("base_command".to_string(), spec.base_command.clone()),
            ("parameters".to_string(), render_parameter_table(spec)),
            (
                "recent_output".to_string(),
                recent_output.unwrap_or("").to_string(),
            ),
        ])
    }
}

impl std::fmt::Debug for Scholar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scholar").finish()
    }
}

/// Render the tool's parameter slots as a table for the command prompt.
fn render_parameter_table(spec: &ToolSpec) -> String {
    spec.parameters
        .iter()
        .map(|slot| {
            let shape = match slot.kind {
                ParamKind::Flag => {
                    let flag = slot.flag.as_deref().unwrap_or("?");
                    if slot.requires_value {
                        format!("{flag} <value>")
                    } else {
                        flag.to_owned()
                    }
                }
                ParamKind::Positional => format!("<{}>", slot.name),
            };
            let required = if slot.required { "required" } else { "optional" };
            let default = slot
                .default
                .as_deref()
                .map(|d| format!(", default {d}"))
                .unwrap_or_default();
            format!("- {} ({shape}, {required}{default})", slot.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic composition without the model.
///
/// Default-on flags (`default: "on"`, no value) and defaulted value flags
/// come from the registry in declaration order; positional slots are
/// filled by the first request token that full-matches their validator,
/// else their default.  Used when the gateway is unreachable, so tool
/// requests with a literal target still yield a preview.
fn compose_fallback(spec: &ToolSpec, request: &str) -> Result<ComposedCommand> {
    let mut argv = vec![spec.base_command.clone()];

    for slot in &spec.parameters {
        match slot.kind {
            ParamKind::Flag => {
                let Some(flag) = &slot.flag else { continue };
                match (&slot.default, slot.requires_value) {
                    (Some(on), false) if on == "on" => argv.push(flag.clone()),
                    (Some(value), true) if slot.required => {
                        argv.push(flag.clone());
                        argv.push(value.clone());
                    }
                    _ => {}
                }
            }
            ParamKind::Positional => {
                let value = extract_token(request, slot.validator.as_deref())
                    .or_else(|| slot.default.clone());
                match value {
                    Some(value) => argv.push(value),
                    None if slot.required => {
                        return Err(ComposeError::MissingRequired {
                            name: slot.name.clone(),
                        });
                    }
                    None => {}
                }
            }
        }
    }

    validate_argv(spec, &argv)?;

    Ok(ComposedCommand {
        tool: spec.name.clone(),
        argv,
        explanation: format!("{} invocation built from registry defaults", spec.name),
    })
}

/// First whitespace token of `request` that full-matches `validator`.
fn extract_token(request: &str, validator: Option<&str>) -> Option<String> {
    let validator = validator?;
    let re = regex::Regex::new(&format!("^(?:{validator})$")).ok()?;

    request
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, '.' | ',' | '?' | '!' | ')' | '(')))
        .find(|token| !token.is_empty() && re.is_match(token))
        .map(str::to_owned)
}

/// Substitute `[NAME]` markers from registry defaults.
///
/// A marker resolves through the slot whose name (or alias) matches it
/// case-insensitively; markers with no defaulted slot are an error.
fn resolve_placeholders(spec: &ToolSpec, argv: Vec<String>) -> Result<Vec<String>> {
    static MARKER: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| {
            regex::Regex::new(r"\[([A-Z][A-Z0-9_]*)\]").unwrap()
        });
    let marker = &*MARKER;

    let mut resolved = Vec::with_capacity(argv.len());
    for element in argv {
        let mut out = element.clone();
        for caps in marker.captures_iter(&element) {
            let name = &caps[1];
            let lowered = name.to_lowercase();

            let default = spec
                .parameters
                .iter()
                .find(|slot| {
                    slot.name.eq_ignore_ascii_case(&lowered)
                        || slot.aliases.iter().any(|a| a.eq_ignore_ascii_case(&lowered))
                })
                .and_then(|slot| slot.default.clone())
                .ok_or_else(|| ComposeError::UnresolvedPlaceholder { name: name.into() })?;

            out = out.replace(&caps[0], &default);
        }
        resolved.push(out);
    }

    Ok(resolved)
}
