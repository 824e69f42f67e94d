//! Configuration management for Perceptix.
//!
//! Loads settings from /etc/perceptix/config.toml or uses defaults. Every
//! field has a serde default so a partial config file is always usable.

use crate::models::SystemMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/perceptix/config.toml";

/// System-wide behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_mode")]
    pub mode: SystemMode,

    #[serde(default = "default_version")]
    pub version: String,

    /// Confidence gate for remediation and escalation, in [0, 100].
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Hard ceiling on cycle ids accepted by `run_cycle`.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,

    /// Meta-learning runs every N cycles.
    #[serde(default = "default_meta_learning_interval")]
    pub meta_learning_interval: u64,
}

fn default_mode() -> SystemMode {
    SystemMode::Demo
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_confidence_threshold() -> f64 {
    85.0
}

fn default_max_cycles() -> u64 {
    10_000
}

fn default_meta_learning_interval() -> u64 {
    5
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            version: default_version(),
            confidence_threshold: default_confidence_threshold(),
            max_cycles: default_max_cycles(),
            meta_learning_interval: default_meta_learning_interval(),
        }
    }
}

/// Reasoning provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Environment variable holding the API key, if the provider needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model_name() -> String {
    "qwen3:8b".to_string()
}

fn default_api_timeout() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model_name: default_model_name(),
            api_key_env: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

/// Per-cycle reasoning budget and cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Maximum provider calls per cycle session.
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,

    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_max_calls() -> u32 {
    8
}

fn default_max_prompt_chars() -> usize {
    140_000
}

fn default_cache_max_entries() -> usize {
    2048
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            max_prompt_chars: default_max_prompt_chars(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// Remediation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_playbook_dir")]
    pub playbook_dir: PathBuf,

    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_minutes: u64,

    /// Simulate all actions without side effects.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_playbook_dir() -> PathBuf {
    PathBuf::from("playbooks")
}

fn default_approval_timeout() -> u64 {
    30
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            playbook_dir: default_playbook_dir(),
            approval_timeout_minutes: default_approval_timeout(),
            dry_run: false,
        }
    }
}

/// Escalation channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    /// When set, alerts are also appended to this file as JSON lines.
    #[serde(default)]
    pub alert_file: Option<PathBuf>,

    #[serde(default = "default_console_enabled")]
    pub console_enabled: bool,
}

fn default_console_enabled() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            alert_file: None,
            console_enabled: default_console_enabled(),
        }
    }
}

/// Historian database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/perceptix/perceptix.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptixConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl PerceptixConfig {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load_default() -> Self {
        Self::load_or_default(Path::new(CONFIG_PATH))
    }

    /// Load configuration from `path`; missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "Could not load {} ({}); using default configuration",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Load configuration from `path`, erroring on missing or invalid files.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PerceptixConfig::default();
        assert_eq!(config.system.confidence_threshold, 85.0);
        assert_eq!(config.reasoning.max_calls, 8);
        assert_eq!(config.reasoning.max_prompt_chars, 140_000);
        assert_eq!(config.remediation.approval_timeout_minutes, 30);
        assert!(config.notification.console_enabled);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let raw = r#"
[system]
confidence_threshold = 90.0

[api]
model_name = "qwen3:4b"
"#;
        let config: PerceptixConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.system.confidence_threshold, 90.0);
        assert_eq!(config.api.model_name, "qwen3:4b");
        // Untouched sections keep defaults.
        assert_eq!(config.reasoning.max_calls, 8);
        assert_eq!(config.api.base_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = PerceptixConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.reasoning.cache_max_entries, 2048);
    }
}
