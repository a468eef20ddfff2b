//! Process-wide configuration (spec.md §6 "Configuration surface",
//! SPEC_FULL.md §4.11).
//!
//! Layered with `figment` exactly the way the teacher's
//! `infrastructure::config::loader::ConfigLoader` layers Abathur's
//! config: programmatic defaults, then an optional file, then environment
//! variables, later layers winning. The teacher merges YAML; this
//! controller has no project directory to read from (it runs as a
//! cluster pod), so the file layer is a single optional TOML path instead
//! of a `.abathur/config.yaml` + `.abathur/local.yaml` pair, and the env
//! prefix is `SYMPOZIUM_` in place of `ABATHUR_`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::logging::LogConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or parse configuration: {0}")]
    Extract(#[from] figment::Error),
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },
}

fn default_namespace() -> String {
    "sympozium-system".to_string()
}

fn default_worker_count_per_kind() -> u32 {
    4
}

fn default_run_timeout_seconds() -> u64 {
    600
}

fn default_memory_max_kb() -> u32 {
    256
}

fn default_scheduler_tick_seconds() -> u64 {
    10
}

fn default_ipc_scan_interval_seconds() -> u64 {
    1
}

fn default_ipc_base_dir() -> PathBuf {
    PathBuf::from("/var/run/sympozium/ipc")
}

/// The full set of process-wide options named in spec.md §6, plus the
/// nested logging block SPEC_FULL.md §4.11 adds. Every field carries a
/// `#[serde(default = ...)]` so a missing config file and a missing
/// environment variable both fall back to the documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub event_bus_url: Option<String>,
    #[serde(default = "default_worker_count_per_kind")]
    pub worker_count_per_kind: u32,
    #[serde(default = "default_run_timeout_seconds")]
    pub default_run_timeout_seconds: u64,
    #[serde(default = "default_memory_max_kb")]
    pub memory_max_kb_default: u32,
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    #[serde(default = "default_ipc_scan_interval_seconds")]
    pub ipc_scan_interval_seconds: u64,
    /// Root directory the IPC routers (C9) scan for schedule/message
    /// directive files, mirrored out of each agent pod's `/ipc` volume by
    /// an out-of-process sync mechanism the controller does not itself
    /// implement (see DESIGN.md).
    #[serde(default = "default_ipc_base_dir")]
    pub ipc_base_dir: PathBuf,
    /// Path for the security-relevant audit trail (admission rejections,
    /// AgentRun spawn/reject decisions, Policy changes). Audit logging is
    /// disabled when unset.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            event_bus_url: None,
            worker_count_per_kind: default_worker_count_per_kind(),
            default_run_timeout_seconds: default_run_timeout_seconds(),
            memory_max_kb_default: default_memory_max_kb(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            ipc_scan_interval_seconds: default_ipc_scan_interval_seconds(),
            ipc_base_dir: default_ipc_base_dir(),
            audit_log_path: None,
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn default_run_timeout(&self) -> Duration {
        Duration::from_secs(self.default_run_timeout_seconds)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }

    pub fn ipc_scan_interval(&self) -> Duration {
        Duration::from_secs(self.ipc_scan_interval_seconds)
    }

    /// Load from the bundled defaults, an optional TOML file at
    /// `file_path`, and `SYMPOZIUM_`-prefixed environment variables —
    /// later layers override earlier ones, matching the teacher's
    /// `ConfigLoader::load` precedence.
    pub fn load(file_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(file_path.as_ref()))
            .merge(Env::prefixed("SYMPOZIUM_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from bundled defaults and the environment only, skipping the
    /// file layer entirely — the common case for a controller started
    /// purely from its Deployment's env vars.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("SYMPOZIUM_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "namespace".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.worker_count_per_kind == 0 {
            return Err(ConfigError::Validation {
                field: "workerCountPerKind".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_run_timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                field: "defaultRunTimeoutSeconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation {
                field: "logging.level".to_string(),
                reason: format!("must be one of {VALID_LEVELS:?}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn env_override_wins_over_default() {
        // SAFETY: test-only env mutation, scoped to this function and
        // cleaned up before returning.
        unsafe {
            std::env::set_var("SYMPOZIUM_NAMESPACE", "custom-ns");
            std::env::set_var("SYMPOZIUM_WORKER_COUNT_PER_KIND", "9");
        }
        let config = Config::load_from_env().unwrap();
        unsafe {
            std::env::remove_var("SYMPOZIUM_NAMESPACE");
            std::env::remove_var("SYMPOZIUM_WORKER_COUNT_PER_KIND");
        }
        assert_eq!(config.namespace, "custom-ns");
        assert_eq!(config.worker_count_per_kind, 9);
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let mut config = Config::default();
        config.worker_count_per_kind = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace = \"from-file\"\nscheduler_tick_seconds = 30").unwrap();
        file.flush().unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.namespace, "from-file");
        assert_eq!(config.scheduler_tick_seconds, 30);
    }
}
