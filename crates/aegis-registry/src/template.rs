//! Prompt templates with named substitution slots.
//!
//! Templates are plain text files containing `{slot}` markers.  Rendering
//! replaces every marker with the caller's binding; unbound markers are
//! left in place so prompt bugs are visible in logs rather than silently
//! swallowed.

use std::collections::HashMap;

/// An immutable named prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Template name, derived from its filename (without extension).
    pub name: String,

    /// The raw template text.
    text: String,
}

impl PromptTemplate {
    /// Create a template from its name and raw text.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Render the template, substituting `{key}` markers with bindings.
    ///
    /// Literal braces can be escaped by doubling (`{{` renders as `{`).
    pub fn render(&self, bindings: &HashMap<String, String>) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    let mut closed = false;
                    for k in chars.by_ref() {
                        if k == '}' {
                            closed = true;
                            break;
                        }
                        key.push(k);
                    }
                    match bindings.get(&key) {
                        Some(value) if closed => out.push_str(value),
                        _ => {
                            // Unbound or unterminated slot: keep the marker.
                            out.push('{');
                            out.push_str(&key);
                            if closed {
                                out.push('}');
                            }
                        }
                    }
                }
                other => out.push(other),
            }
        }

        out
    }

    /// The names of all `{slot}` markers present in the template.
    pub fn slots(&self) -> Vec<String> {
        let mut slots = Vec::new();
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    continue;
                }
                let mut key = String::new();
                for k in chars.by_ref() {
                    if k == '}' {
                        if !key.is_empty() && !slots.contains(&key) {
                            slots.push(key.clone());
                        }
                        break;
                    }
                    key.push(k);
                }
            }
        }
        slots
    }

    /// The raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_substitutes_bound_slots() {
        let t = PromptTemplate::new("greet", "Hello {name}, you are a {role}.");
        let out = t.render(&bindings(&[("name", "Ada"), ("role", "student")]));
        assert_eq!(out, "Hello Ada, you are a student.");
    }

    #[test]
    fn render_keeps_unbound_slots() {
        let t = PromptTemplate::new("t", "cmd={command} role={role}");
        let out = t.render(&bindings(&[("command", "nmap -sS")]));
        assert_eq!(out, "cmd=nmap -sS role={role}");
    }

    #[test]
    fn render_escaped_braces() {
        let t = PromptTemplate::new("t", r#"Reply with {{"level": "{level}"}}"#);
        let out = t.render(&bindings(&[("level", "low")]));
        assert_eq!(out, r#"Reply with {"level": "low"}"#);
    }

    #[test]
    fn slots_lists_each_once() {
        let t = PromptTemplate::new("t", "{a} and {b} then {a} again, not {{c}}");
        assert_eq!(t.slots(), vec!["a".to_string(), "b".to_string()]);
    }
}
