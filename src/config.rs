//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `PORTAL_CONFIG_URL`, `PORTAL_PAGE_URL`,
//!    `PORTAL_ENVIRONMENT`
//! 2. **Config file**: path via `--config <path>`, or `portal.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [source]
//! config_url = "./config.json"          # http(s) URL or local path
//! page_url = "http://localhost:8080/portal.html"
//!
//! [probe]
//! health_path = "/api/HealthCheck/system"
//! version_path = "/api/HealthCheck/version"
//! timeout_ms = 5000
//!
//! [recovery]
//! health_check_interval_secs = 30
//! rediscovery_interval_secs = 10
//! stage_tick_ms = 1000
//! initial_load_timeout_secs = 15
//! rotation_confirm_secs = 10               # 0 = switch without asking
//! recovery_confirm_secs = 0
//!
//! [navigation]
//! debounce_ms = 300
//! priority_window_ms = 2000
//! write_guard_ms = 100
//! history_guard_ms = 200
//! poll_interval_ms = 1000
//! reentry_marker = "gateway.html"
//! reentry_url = "./gateway.html"
//!
//! [environment]
//! default = "production"
//! preference_file = ".portal-preference.json"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::environment::EnvironmentPreference;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the snapshot document lives and which page hosts the portal.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Snapshot document location. Override with `PORTAL_CONFIG_URL`.
    #[serde(default = "default_config_url")]
    pub config_url: String,
    /// Address of the host page. Override with `PORTAL_PAGE_URL`.
    #[serde(default = "default_page_url")]
    pub page_url: String,
}

/// Health probe settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Path appended to the tunnel address for liveness probes.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Optional version endpoint (`{"gitSha": "..."}`).
    #[serde(default = "default_version_path")]
    pub version_path: String,
    /// Hard probe timeout in milliseconds (default 5000).
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

/// Outage detection and rediscovery cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Seconds between proactive checks while connected (default 30).
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// Seconds between rediscovery ticks during an outage (default 10).
    #[serde(default = "default_rediscovery_interval")]
    pub rediscovery_interval_secs: u64,
    /// Banner refresh period in milliseconds (default 1000).
    #[serde(default = "default_stage_tick_ms")]
    pub stage_tick_ms: u64,
    /// Seconds the embedded session gets to finish its first load (default 15).
    #[serde(default = "default_initial_load_timeout")]
    pub initial_load_timeout_secs: u64,
    /// Countdown before switching a healthy session to a rotated address (default 10).
    #[serde(default = "default_rotation_confirm")]
    pub rotation_confirm_secs: u32,
    /// Countdown before switching during an outage (default 0, switch immediately).
    #[serde(default)]
    pub recovery_confirm_secs: u32,
}

/// Navigation synchronizer timings.
#[derive(Debug, Clone, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_priority_window_ms")]
    pub priority_window_ms: u64,
    #[serde(default = "default_write_guard_ms")]
    pub write_guard_ms: u64,
    #[serde(default = "default_history_guard_ms")]
    pub history_guard_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Substring that marks the host's own sign-in surface.
    #[serde(default = "default_reentry_marker")]
    pub reentry_marker: String,
    /// Where the whole page goes when the embedded session hits the sign-in surface.
    #[serde(default = "default_reentry_url")]
    pub reentry_url: String,
}

/// Environment preference defaults and persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Used when nothing valid is stored. Override with `PORTAL_ENVIRONMENT`.
    #[serde(default)]
    pub default: EnvironmentPreference,
    /// JSON file holding the persisted preference.
    #[serde(default = "default_preference_file")]
    pub preference_file: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Errors raised while loading `portal.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_config_url() -> String {
    "./config.json".to_string()
}
fn default_page_url() -> String {
    "http://localhost:8080/portal.html".to_string()
}
fn default_health_path() -> String {
    "/api/HealthCheck/system".to_string()
}
fn default_version_path() -> String {
    "/api/HealthCheck/version".to_string()
}
fn default_probe_timeout_ms() -> u64 {
    5000
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_rediscovery_interval() -> u64 {
    10
}
fn default_stage_tick_ms() -> u64 {
    1000
}
fn default_initial_load_timeout() -> u64 {
    15
}
fn default_rotation_confirm() -> u32 {
    10
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_priority_window_ms() -> u64 {
    2000
}
fn default_write_guard_ms() -> u64 {
    100
}
fn default_history_guard_ms() -> u64 {
    200
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_reentry_marker() -> String {
    "gateway.html".to_string()
}
fn default_reentry_url() -> String {
    "./gateway.html".to_string()
}
fn default_preference_file() -> String {
    ".portal-preference.json".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            config_url: default_config_url(),
            page_url: default_page_url(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_path: default_health_path(),
            version_path: default_version_path(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            rediscovery_interval_secs: default_rediscovery_interval(),
            stage_tick_ms: default_stage_tick_ms(),
            initial_load_timeout_secs: default_initial_load_timeout(),
            rotation_confirm_secs: default_rotation_confirm(),
            recovery_confirm_secs: 0,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            priority_window_ms: default_priority_window_ms(),
            write_guard_ms: default_write_guard_ms(),
            history_guard_ms: default_history_guard_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reentry_marker: default_reentry_marker(),
            reentry_url: default_reentry_url(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            default: EnvironmentPreference::default(),
            preference_file: default_preference_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RecoveryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn rediscovery_interval(&self) -> Duration {
        Duration::from_secs(self.rediscovery_interval_secs)
    }

    pub fn stage_tick(&self) -> Duration {
        Duration::from_millis(self.stage_tick_ms)
    }

    pub fn initial_load_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_load_timeout_secs)
    }
}

impl PortalConfig {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for `portal.toml`
    /// in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("portal.toml").exists() {
            Self::from_file("portal.toml")?
        } else {
            Self::default()
        };

        // Env var overrides
        if let Ok(url) = std::env::var("PORTAL_CONFIG_URL") {
            config.source.config_url = url;
        }
        if let Ok(url) = std::env::var("PORTAL_PAGE_URL") {
            config.source.page_url = url;
        }
        if let Ok(env) = std::env::var("PORTAL_ENVIRONMENT") {
            config.environment.default = env.parse().map_err(ConfigError::Invalid)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Parse a TOML document; missing sections and fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.config_url.is_empty() {
            return Err(ConfigError::Invalid("source.config_url is empty".into()));
        }
        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe.timeout_ms must be > 0".into()));
        }
        if self.recovery.rediscovery_interval_secs == 0
            || self.recovery.health_check_interval_secs == 0
        {
            return Err(ConfigError::Invalid(
                "recovery intervals must be > 0".into(),
            ));
        }
        if self.navigation.poll_interval_ms == 0 || self.recovery.stage_tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick intervals must be > 0".into(),
            ));
        }
        if !self.probe.health_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "probe.health_path must start with '/': {}",
                self.probe.health_path
            )));
        }
        Ok(())
    }
}
