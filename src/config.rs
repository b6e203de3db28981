//! Configuration
//!
//! Loaded from a TOML file (`~/.config/ocpp-bridge/config.toml` by default,
//! `OCPP_BRIDGE_CONFIG` to override), then patched from the environment
//! variables the deployment already uses (`PORT`, `API_URL`, `API_KEY`,
//! `LOG_LEVEL`). Every field has a default, so a missing file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-bridge")
        .join("config.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub backend: BackendConfig,
    #[validate(nested)]
    pub session: SessionConfig,
    #[validate(nested)]
    pub charging_profile: ChargingProfileConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load from `path`; a missing file yields the defaults.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("API_URL") {
            self.backend.base_url = url;
        }
        if let Some(key) = lookup("API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

// ── [server] ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    /// How long a server-initiated call waits for the charger's answer.
    #[validate(range(min = 1, max = 600))]
    pub call_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Consecutive unparseable frames tolerated before the connection is closed.
    #[validate(range(min = 1))]
    pub max_malformed_frames: u32,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            call_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            max_malformed_frames: 10,
        }
    }
}

// ── [backend] ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the internal API, e.g. `http://api:80/api/v1/internal`.
    #[validate(url)]
    pub base_url: String,
    /// Shared internal credential, sent as `x-api-key`.
    pub api_key: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
    #[validate(range(min = 1, max = 120))]
    pub connect_timeout_secs: u64,
    /// Attempts for the identity check while the backend is unreachable.
    #[validate(range(min = 1, max = 10))]
    pub identity_check_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://api:80/api/v1/internal".to_string(),
            api_key: None,
            timeout_secs: 5,
            connect_timeout_secs: 2,
            identity_check_attempts: 3,
        }
    }
}

// ── [session] ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an accepted Authorize may start a session.
    #[validate(range(min = 1))]
    pub auth_ttl_secs: i64,
    /// Heartbeat interval handed out on an accepted boot.
    #[validate(range(min = 1))]
    pub heartbeat_interval_secs: i32,
    /// Interval handed out with a Rejected / Pending boot.
    #[validate(range(min = 1))]
    pub boot_retry_interval_secs: i32,
    /// Delay between StartTransaction and the charging-profile push.
    pub profile_settle_delay_ms: u64,
    /// Pushed as `MeterValueSampleInterval` after an accepted boot.
    pub meter_value_sample_interval_secs: Option<u32>,
}

impl SessionConfig {
    pub fn auth_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auth_ttl_secs)
    }

    pub fn profile_settle_delay(&self) -> Duration {
        Duration::from_millis(self.profile_settle_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_ttl_secs: 30,
            heartbeat_interval_secs: 300,
            boot_retry_interval_secs: 60,
            profile_settle_delay_ms: 2000,
            meter_value_sample_interval_secs: None,
        }
    }
}

// ── [charging_profile] ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChargingProfileConfig {
    /// Used when the backend assigns no power cap.
    #[validate(range(min = 0.0))]
    pub default_power_kw: f64,
    /// Lowest limit ever commanded.
    #[validate(range(min = 0.0))]
    pub min_power_kw: f64,
    pub profile_id: i32,
    #[validate(range(min = 0))]
    pub stack_level: i32,
    #[validate(range(min = 1, max = 3))]
    pub number_phases: i32,
}

impl Default for ChargingProfileConfig {
    fn default() -> Self {
        Self {
            default_power_kw: 11.0,
            min_power_kw: 4.0,
            profile_id: 1,
            stack_level: 8,
            number_phases: 3,
        }
    }
}

// ── [logging] / [metrics] ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    #[validate(length(min = 1))]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9464".to_string(),
        }
    }
}
