//! Configuration loading for the Taskflow client.
//!
//! Connection fields are required. Cache timings and logging have defaults
//! and may be omitted.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskflow_core::{CacheTtls, RefreshIntervals};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "TASKFLOW_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Project URL of the hosted backend, e.g. `https://xyz.supabase.co`.
    pub api_base_url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    pub request_timeout_ms: u64,
    /// Directory of the LMDB mirror. Memory-only when absent.
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,
    #[serde(default = "default_mirror_max_size_mb")]
    pub mirror_max_size_mb: usize,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_mirror_max_size_mb() -> usize {
    taskflow_storage::cache::DEFAULT_MAX_SIZE_MB
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtlConfig {
    pub identity_ms: u64,
    pub notifications_ms: u64,
    pub workspaces_ms: u64,
    pub projects_ms: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            identity_ms: ttls.identity.as_millis() as u64,
            notifications_ms: ttls.notifications.as_millis() as u64,
            workspaces_ms: ttls.workspaces.as_millis() as u64,
            projects_ms: ttls.projects.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    pub visible_ms: u64,
    pub hidden_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        let intervals = RefreshIntervals::default();
        Self {
            visible_ms: intervals.visible.as_millis() as u64,
            hidden_ms: intervals.hidden.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TASKFLOW_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "anon_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(path) = &self.mirror_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "mirror_path",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        if self.mirror_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mirror_max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        let ttls = [
            ("ttl.identity_ms", self.ttl.identity_ms),
            ("ttl.notifications_ms", self.ttl.notifications_ms),
            ("ttl.workspaces_ms", self.ttl.workspaces_ms),
            ("ttl.projects_ms", self.ttl.projects_ms),
        ];
        for (field, value) in ttls {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be > 0".to_string(),
                });
            }
        }
        if self.refresh.visible_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh.visible_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.refresh.hidden_ms < self.refresh.visible_ms {
            return Err(ConfigError::InvalidValue {
                field: "refresh.hidden_ms",
                reason: "must be >= visible_ms".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            identity: Duration::from_millis(self.ttl.identity_ms),
            notifications: Duration::from_millis(self.ttl.notifications_ms),
            workspaces: Duration::from_millis(self.ttl.workspaces_ms),
            projects: Duration::from_millis(self.ttl.projects_ms),
        }
    }

    pub fn refresh_intervals(&self) -> RefreshIntervals {
        RefreshIntervals {
            visible: Duration::from_millis(self.refresh.visible_ms),
            hidden: Duration::from_millis(self.refresh.hidden_ms),
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
