//! Registry type definitions.
//!
//! A tool is described in two layers: a row in the master registry (name,
//! category, keywords, risk baseline) and a detailed per-tool registry
//! (base command, parameter slots, optional workflow and output parser).
//! Both layers are immutable once loaded.

use serde::{Deserialize, Serialize};

/// Severity scale shared by tool baselines, risk patterns, and verdicts.
///
/// The ordering is load-bearing: verdict merging takes the ordinal maximum
/// of the static and contextual levels.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Convert to the string used in registry files and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the system does with a command at a given risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    /// Execute without interaction.
    Allow,
    /// Execute, but surface a warning first.
    Warn,
    /// Require explicit user confirmation before execution.
    RequireConfirm,
    /// Never execute.
    Block,
}

impl RiskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::RequireConfirm => "require_confirm",
            Self::Block => "block",
        }
    }
}

impl std::fmt::Display for RiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User role, an input to prompt rendering and tool ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    ForensicExpert,
    PenTester,
}

impl Role {
    /// Tool categories this role gravitates towards, used as the first
    /// tie-break in search ranking.
    pub fn preferred_categories(&self) -> &'static [&'static str] {
        match self {
            Self::Student => &["information_gathering", "network_scanning"],
            Self::ForensicExpert => &["forensics", "memory_analysis", "packet_capture"],
            Self::PenTester => &["exploitation", "web_enumeration", "password_attacks"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::ForensicExpert => "forensic_expert",
            Self::PenTester => "pen_tester",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a parameter slot appears on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// A flag such as `-sS` or `--wordlist`, optionally taking a value.
    Flag,
    /// A bare positional argument (e.g. the scan target).
    Positional,
}

/// One parameter slot in a tool's registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSlot {
    /// Slot name used in prompts and error reporting (e.g. `target`).
    pub name: String,

    /// Flag or positional.
    pub kind: ParamKind,

    /// The literal flag string (`-p`, `--url`).  `None` for positionals.
    #[serde(default)]
    pub flag: Option<String>,

    /// Whether the flag consumes a following value.  Positionals always do.
    #[serde(default)]
    pub requires_value: bool,

    /// Whether composition must supply this slot (or a default).
    #[serde(default)]
    pub required: bool,

    /// Keyword aliases used when matching free text against this slot.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Default value substituted for unresolved placeholders.
    #[serde(default)]
    pub default: Option<String>,

    /// Validation regex applied to supplied values.
    #[serde(default)]
    pub validator: Option<String>,
}

/// A row in the master tool registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Unique tool name (e.g. `nmap`).
    pub name: String,

    /// Category used for role affinity ranking (e.g. `network_scanning`).
    pub category: String,

    /// Baseline risk before any command-specific evaluation.
    pub risk_baseline: RiskLevel,

    /// Keywords matched against free-text requests.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Detailed, immutable descriptor for a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name, matching its master registry row.
    pub name: String,

    /// The program invoked as `argv[0]`.
    pub base_command: String,

    /// Category used for role affinity ranking.
    pub category: String,

    /// Baseline risk before any command-specific evaluation.
    pub risk_baseline: RiskLevel,

    /// Keywords matched against free-text requests.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Declared parameter slots.  Every flag or positional emitted by
    /// composition must correspond to one of these.
    #[serde(default)]
    pub parameters: Vec<ParamSlot>,

    /// Multi-step workflow description for tools that chain invocations.
    #[serde(default)]
    pub workflow: Option<WorkflowTemplate>,

    /// Name of a registered output parser applied to final stdout.
    #[serde(default)]
    pub output_parser: Option<String>,
}

impl ToolSpec {
    /// Find a parameter slot by its flag string.
    pub fn slot_for_flag(&self, flag: &str) -> Option<&ParamSlot> {
        self.parameters
            .iter()
            .find(|p| p.kind == ParamKind::Flag && p.flag.as_deref() == Some(flag))
    }

    /// Positional slots in declaration order.
    pub fn positional_slots(&self) -> impl Iterator<Item = &ParamSlot> {
        self.parameters
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
    }
}

/// An ordered list of step descriptions for multi-step tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub steps: Vec<String>,
}

/// One entry in the risk-pattern database as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPatternEntry {
    /// The regex matched against candidate command strings.
    pub pattern: String,

    /// Severity assigned when the pattern matches.
    pub level: RiskLevel,

    /// Human-readable description of what the pattern catches.
    pub description: String,

    /// Safer alternatives suggested to the user.
    #[serde(default)]
    pub alternatives: Vec<String>,

    /// What to do when the pattern matches.
    pub action: RiskAction,
}

/// A risk pattern with its compiled regex, ready for evaluation.
///
/// Compiled once at load; the pattern list is pre-sorted by descending
/// severity so the first match dominates.
#[derive(Debug, Clone)]
pub struct RiskPattern {
    pub entry: RiskPatternEntry,
    pub(crate) compiled: regex::Regex,
}

impl RiskPattern {
    /// Whether this pattern matches the given command string.
    pub fn is_match(&self, command: &str) -> bool {
        self.compiled.is_match(command)
    }
}
