//! Argv validation against a tool's registry entry.
//!
//! The composer never returns raw shell; only argv vectors that have been
//! checked element by element: `argv[0]` must equal the tool's base
//! command, every flag and positional must be declared in the registry,
//! values must pass the registry validator, and no element may contain
//! shell metacharacters.

use std::collections::HashSet;

use aegis_registry::{ParamKind, ToolSpec};

use crate::error::{ComposeError, Result};

/// Characters that would change meaning if an argv element ever leaked
/// into a shell.  Rejected outright inside individual elements.
const SHELL_METACHARACTERS: &[char] =
    &[';', '&', '|', '`', '$', '>', '<', '(', ')', '\n', '\r', '\'', '"', '\\'];

/// Check a composed argv against the tool's parameter declarations.
pub fn validate_argv(spec: &ToolSpec, argv: &[String]) -> Result<()> {
    let Some(first) = argv.first() else {
        return Err(ComposeError::ValidationFailed {
            param: "argv".into(),
            reason: "empty argv".into(),
        });
    };

    if *first != spec.base_command {
        return Err(ComposeError::ValidationFailed {
            param: "argv[0]".into(),
            reason: format!(
                "`{first}` does not match the tool's base command `{}`",
                spec.base_command
            ),
        });
    }

    let mut supplied: HashSet<&str> = HashSet::new();
    let positionals: Vec<_> = spec.positional_slots().collect();
    let mut positionals_seen = 0usize;

    let mut i = 1;
    while i < argv.len() {
        let element = &argv[i];
        reject_metacharacters(element)?;

        if element.starts_with('-') && element.len() > 1 {
            let slot =
                spec.slot_for_flag(element)
                    .ok_or_else(|| ComposeError::ValidationFailed {
                        param: element.clone(),
                        reason: "flag not declared in the tool registry".into(),
                    })?;
            supplied.insert(slot.name.as_str());

            if slot.requires_value {
                let value = argv.get(i + 1).ok_or_else(|| ComposeError::ValidationFailed {
                    param: slot.name.clone(),
                    reason: format!("flag `{element}` requires a value"),
                })?;
                reject_metacharacters(value)?;
                check_value(slot.validator.as_deref(), &slot.name, value)?;
                i += 2;
            } else {
                i += 1;
            }
        } else {
            let slot = positionals.get(positionals_seen).ok_or_else(|| {
                ComposeError::ValidationFailed {
                    param: element.clone(),
                    reason: "positional argument not declared in the tool registry".into(),
                }
            })?;
            check_value(slot.validator.as_deref(), &slot.name, element)?;
            supplied.insert(slot.name.as_str());
            positionals_seen += 1;
            i += 1;
        }
    }

    // Required slots must be supplied or carry a default (defaults are
    // filled in before validation).
    for slot in &spec.parameters {
        if slot.required && !supplied.contains(slot.name.as_str()) && slot.default.is_none() {
            return Err(ComposeError::MissingRequired {
                name: slot.name.clone(),
            });
        }
    }

    Ok(())
}

/// Append defaults for required slots the model left out entirely.
///
/// Flags come first (order of declaration), positionals last so their
/// relative order is preserved.
pub fn fill_missing_defaults(spec: &ToolSpec, mut argv: Vec<String>) -> Vec<String> {
    let supplied = supplied_slot_names(spec, &argv);

    for slot in &spec.parameters {
        if !slot.required || supplied.contains(slot.name.as_str()) {
            continue;
        }
        let Some(default) = &slot.default else {
            continue;
        };
        match slot.kind {
            ParamKind::Flag => {
                if let Some(flag) = &slot.flag {
                    argv.push(flag.clone());
                    if slot.requires_value {
                        argv.push(default.clone());
                    }
                }
            }
            ParamKind::Positional => argv.push(default.clone()),
        }
    }

    argv
}

/// Slot names already present in the argv (best-effort scan, used only
/// for default filling; full checking happens in [`validate_argv`]).
fn supplied_slot_names<'a>(spec: &'a ToolSpec, argv: &[String]) -> HashSet<&'a str> {
    let mut supplied = HashSet::new();
    let positionals: Vec<_> = spec.positional_slots().collect();
    let mut positionals_seen = 0usize;

    let mut i = 1;
    while i < argv.len() {
        let element = &argv[i];
        if element.starts_with('-') && element.len() > 1 {
            if let Some(slot) = spec.slot_for_flag(element) {
                supplied.insert(slot.name.as_str());
                if slot.requires_value {
                    i += 1;
                }
            }
        } else if let Some(slot) = positionals.get(positionals_seen) {
            supplied.insert(slot.name.as_str());
            positionals_seen += 1;
        }
        i += 1;
    }

    supplied
}

fn reject_metacharacters(element: &str) -> Result<()> {
    if let Some(bad) = element.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(ComposeError::ValidationFailed {
            param: element.to_owned(),
            reason: format!("shell metacharacter `{bad}` not permitted"),
        });
    }
    Ok(())
}

/// Apply a registry validator regex as a full match.
fn check_value(validator: Option<&str>, name: &str, value: &str) -> Result<()> {
    let Some(validator) = validator else {
        return Ok(());
    };

    let re = regex::Regex::new(&format!("^(?:{validator})$")).map_err(|e| {
        ComposeError::ValidationFailed {
            param: name.to_owned(),
            reason: format!("registry validator did not compile: {e}"),
        }
    })?;

    if !re.is_match(value) {
        return Err(ComposeError::ValidationFailed {
            param: name.to_owned(),
            reason: format!("value `{value}` rejected by validator"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_registry::{ParamSlot, RiskLevel};

    fn slot(name: &str, kind: ParamKind, flag: Option<&str>) -> ParamSlot {
        ParamSlot {
            name: name.into(),
            kind,
            flag: flag.map(Into::into),
            requires_value: false,
            required: false,
            aliases: vec![],
            default: None,
            validator: None,
        }
    }

    fn nmap_spec() -> ToolSpec {
        ToolSpec {
            name: "nmap".into(),
            base_command: "nmap".into(),
            category: "network_scanning".into(),
            risk_baseline: RiskLevel::Low,
            keywords: vec![],
            parameters: vec![
                slot("syn_scan", ParamKind::Flag, Some("-sS")),
                slot("timing", ParamKind::Flag, Some("-T4")),
                ParamSlot {
                    name: "ports".into(),
                    kind: ParamKind::Flag,
                    flag: Some("-p".into()),
                    requires_value: true,
                    required: false,
                    aliases: vec![],
                    default: None,
                    validator: Some(r"[0-9,\-]+".into()),
                },
                ParamSlot {
                    name: "target".into(),
                    kind: ParamKind::Positional,
                    flag: None,
                    requires_value: true,
                    required: true,
                    aliases: vec!["host".into()],
                    default: None,
                    validator: Some(r"[A-Za-z0-9_.:\/-]+".into()),
                },
            ],
            workflow: None,
            output_parser: Some("nmap".into()),
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn happy_path_validates() {
        let spec = nmap_spec();
        assert!(validate_argv(&spec, &argv(&["nmap", "-sS", "-T4", "127.0.0.1"])).is_ok());
    }

    #[test]
    fn wrong_base_command_rejected() {
        let spec = nmap_spec();
        let err = validate_argv(&spec, &argv(&["masscan", "127.0.0.1"])).unwrap_err();
        assert!(matches!(err, ComposeError::ValidationFailed { .. }));
    }

    #[test]
    fn undeclared_flag_rejected() {
        let spec = nmap_spec();
        let err = validate_argv(&spec, &argv(&["nmap", "-sV", "127.0.0.1"])).unwrap_err();
        match err {
            ComposeError::ValidationFailed { param, .. } => assert_eq!(param, "-sV"),
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn flag_value_consumed_and_validated() {
        let spec = nmap_spec();
        assert!(validate_argv(&spec, &argv(&["nmap", "-p", "1-1000", "10.0.0.1"])).is_ok());

        let err = validate_argv(&spec, &argv(&["nmap", "-p", "http!", "10.0.0.1"])).unwrap_err();
        assert!(matches!(err, ComposeError::ValidationFailed { .. }));
    }

    #[test]
    fn flag_missing_value_rejected() {
        let spec = nmap_spec();
        let err = validate_argv(&spec, &argv(&["nmap", "-p"])).unwrap_err();
        assert!(matches!(err, ComposeError::ValidationFailed { .. }));
    }

    #[test]
    fn missing_required_positional() {
        let spec = nmap_spec();
        let err = validate_argv(&spec, &argv(&["nmap", "-sS"])).unwrap_err();
        match err {
            ComposeError::MissingRequired { name } => assert_eq!(name, "target"),
            other => panic!("expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn extra_positional_rejected() {
        let spec = nmap_spec();
        let err =
            validate_argv(&spec, &argv(&["nmap", "10.0.0.1", "10.0.0.2"])).unwrap_err();
        assert!(matches!(err, ComposeError::ValidationFailed { .. }));
    }

    #[test]
    fn metacharacters_rejected() {
        let spec = nmap_spec();
        for bad in ["127.0.0.1;reboot", "$(whoami)", "a|b", "x&&y", "`id`"] {
            let err = validate_argv(&spec, &argv(&["nmap", bad]));
            assert!(err.is_err(), "expected `{bad}` to be rejected");
        }
    }

    #[test]
    fn defaults_filled_for_missing_required() {
        let mut spec = nmap_spec();
        spec.parameters[3].default = Some("127.0.0.1".into());

        let filled = fill_missing_defaults(&spec, argv(&["nmap", "-sS"]));
        assert_eq!(filled, argv(&["nmap", "-sS", "127.0.0.1"]));
        assert!(validate_argv(&spec, &filled).is_ok());
    }

    #[test]
    fn defaults_not_duplicated_when_supplied() {
        let mut spec = nmap_spec();
        spec.parameters[3].default = Some("127.0.0.1".into());

        let filled = fill_missing_defaults(&spec, argv(&["nmap", "10.9.8.7"]));
        assert_eq!(filled, argv(&["nmap", "10.9.8.7"]));
    }
}
