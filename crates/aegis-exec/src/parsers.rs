//! Tool-output parsers.
//!
//! A parser registered alongside a tool's registry entry post-processes
//! the final stdout into a structured summary.  Parsing is best-effort:
//! failure is recorded on the interaction, never fatal.

use std::collections::HashMap;

use serde_json::{Value, json};

/// Parser signature: final stdout in, structured summary out.
pub type OutputParser = fn(&str) -> Option<Value>;

/// Registry of named parsers.
pub struct ParserRegistry {
    parsers: HashMap<&'static str, OutputParser>,
}

impl ParserRegistry {
    /// The built-in parser set.
    pub fn builtin() -> Self {
        let mut parsers: HashMap<&'static str, OutputParser> = HashMap::new();
        parsers.insert("nmap", parse_nmap);
        Self { parsers }
    }

    /// Run a named parser over stdout.
    ///
    /// Returns `Ok(None)` when no parser is registered under `name`,
    /// `Err` when the parser ran but could not make sense of the output.
    pub fn parse(&self, name: &str, stdout: &str) -> Result<Option<Value>, String> {
        let Some(parser) = self.parsers.get(name) else {
            return Ok(None);
        };
        match parser(stdout) {
            Some(value) => Ok(Some(value)),
            None => Err(format!("`{name}` parser found no recognisable output")),
        }
    }

    /// Register an additional parser (used by tests and embedders).
    pub fn register(&mut self, name: &'static str, parser: OutputParser) {
        self.parsers.insert(name, parser);
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse nmap's human-readable output into open ports and host status.
fn parse_nmap(stdout: &str) -> Option<Value> {
    let mut open_ports = Vec::new();
    let mut host_status = None;

    for line in stdout.lines() {
        let line = line.trim();

        if line.starts_with("Host is ") {
            host_status = Some(line.trim_start_matches("Host is ").trim_end_matches('.'));
            continue;
        }

        // Port table rows look like `22/tcp  open  ssh`.
        let mut fields = line.split_whitespace();
        let (Some(port_proto), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        if state != "open" {
            continue;
        }
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        let service = fields.next().unwrap_or("unknown");
        open_ports.push(json!({
            "port": port,
            "protocol": proto,
            "service": service,
        }));
    }

    if open_ports.is_empty() && host_status.is_none() {
        return None;
    }

    Some(json!({
        "open_ports": open_ports,
        "host_status": host_status.unwrap_or("unknown"),
    }))
}
