//! Service configuration.
//!
//! Loaded from a TOML document (`aegis.toml` by convention); every option
//! has a default so a missing file or section still yields a runnable
//! configuration.  The one required secret — the LLM API key — comes from
//! the environment, never from this file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aegis_exec::{ExecutorConfig, ResourceCaps};
use aegis_llm::GatewayConfig;
use aegis_registry::{RegistryPaths, RiskLevel};
use aegis_store::StoreConfig;

/// Environment variable holding the LLM API key.  Absence is fatal at
/// startup.
pub const API_KEY_ENV: &str = "AEGIS_LLM_API_KEY";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    pub log_level: LogLevel,
    pub llm: LlmSection,
    pub executor: ExecutorSection,
    pub session: SessionSection,
    pub risk: RiskSection,
    pub paths: PathsSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing_subscriber` filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: String,
    pub temperature_default: f32,
    pub deadline_ms: u64,
    pub retry_attempts: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "aegis-cyber-1".into(),
            base_url: "https://llm.aegis.internal".into(),
            temperature_default: 0.1,
            deadline_ms: 30_000,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub max_global: usize,
    pub max_per_session: usize,
    pub default_deadline_s: u64,
    pub cpu_seconds: u64,
    pub mem_bytes: u64,
    pub fsize_bytes: u64,
    pub output_cap_bytes: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_global: 32,
            max_per_session: 3,
            default_deadline_s: 120,
            cpu_seconds: 300,
            mem_bytes: 1 << 30,
            fsize_bytes: 100 * 1024 * 1024,
            output_cap_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_seconds: i64,
    pub conv_cap: usize,
    pub cmd_cap: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
            conv_cap: 100,
            cmd_cap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    /// Severity at which execution requires explicit confirmation.
    pub require_confirmation_at: RiskLevel,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            require_confirmation_at: RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub tool_registry: PathBuf,
    pub per_tool_registries: PathBuf,
    pub risk_patterns: PathBuf,
    pub prompts: PathBuf,
    pub outputs: PathBuf,
    pub sessions: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            tool_registry: "assets/tools.json".into(),
            per_tool_registries: "assets/tools".into(),
            risk_patterns: "assets/risk_patterns.json".into(),
            prompts: "assets/prompts".into(),
            outputs: "outputs".into(),
            sessions: "sessions".into(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("required environment variable {API_KEY_ENV} is not set")]
    MissingApiKey,
}

impl AegisConfig {
    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Read the required LLM API key from the environment.
    pub fn api_key() -> Result<String, ConfigError> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn registry_paths(&self) -> RegistryPaths {
        RegistryPaths {
            tool_registry: self.paths.tool_registry.clone(),
            per_tool_registries: self.paths.per_tool_registries.clone(),
            risk_patterns: self.paths.risk_patterns.clone(),
            prompts: self.paths.prompts.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            temperature_default: self.llm.temperature_default,
            deadline: Duration::from_millis(self.llm.deadline_ms),
            retry_attempts: self.llm.retry_attempts,
            ..GatewayConfig::default()
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_global: self.executor.max_global,
            max_per_session: self.executor.max_per_session,
            default_deadline: Duration::from_secs(self.executor.default_deadline_s),
            outputs_dir: self.paths.outputs.clone(),
            ..ExecutorConfig::default()
        }
    }

    pub fn resource_caps(&self) -> ResourceCaps {
        ResourceCaps {
            cpu_seconds: self.executor.cpu_seconds,
            mem_bytes: self.executor.mem_bytes,
            fsize_bytes: self.executor.fsize_bytes,
            output_cap_bytes: self.executor.output_cap_bytes,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            ttl_seconds: self.session.ttl_seconds,
            conv_cap: self.session.conv_cap,
            cmd_cap: self.session.cmd_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = AegisConfig::load(Path::new("/nonexistent/aegis.toml")).unwrap();
        assert_eq!(config.executor.max_global, 32);
        assert_eq!(config.session.conv_cap, 100);
        assert_eq!(config.risk.require_confirmation_at, RiskLevel::High);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("aegis.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[executor]
max_global = 8

[risk]
require_confirmation_at = "medium"
"#,
        )
        .unwrap();

        let config = AegisConfig::load(&path).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.executor.max_global, 8);
        // Unset options keep their defaults.
        assert_eq!(config.executor.max_per_session, 3);
        assert_eq!(config.risk.require_confirmation_at, RiskLevel::Medium);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("aegis.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(matches!(
            AegisConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn derived_configs_reflect_sections() {
        let config = AegisConfig::default();
        assert_eq!(config.gateway_config().retry_attempts, 3);
        assert_eq!(config.executor_config().max_per_session, 3);
        assert_eq!(config.resource_caps().cpu_seconds, 300);
        assert_eq!(config.store_config().cmd_cap, 200);
    }
}
