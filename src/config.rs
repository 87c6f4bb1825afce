use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::ws::maintenance::MaintenancePolicy;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port, shared by the collaboration socket and the HTTP API
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Room joined when the request path has no room segment
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Refuse connections beyond this many per room
    pub max_connections_per_room: Option<usize>,

    /// Seconds an empty room survives before eviction, 0 disables eviction
    #[serde(default = "default_room_idle_grace_secs")]
    pub room_idle_grace_secs: u64,

    /// Seconds a presence entry survives without renewal, 0 disables expiry
    #[serde(default = "default_presence_timeout_secs")]
    pub presence_timeout_secs: u64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Frames queued per connection before further frames to it are dropped
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        let config = Self::from_vars(std::env::vars())?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Build a configuration from explicit `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::from_iter(vars)?;
        if config.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance_interval_secs must be greater than 0".to_string(),
            ));
        }
        if config.max_connections_per_room == Some(0) {
            return Err(ConfigError::Invalid(
                "max_connections_per_room must be greater than 0".to_string(),
            ));
        }
        if config.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(config)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("dev")
            || self.environment.eq_ignore_ascii_case("development")
    }

    /// Configured CORS origins, trimmed, empty entries skipped.
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn maintenance_policy(&self) -> MaintenancePolicy {
        MaintenancePolicy {
            interval: Duration::from_secs(self.maintenance_interval_secs),
            presence_timeout: non_zero_secs(self.presence_timeout_secs),
            room_idle_grace: non_zero_secs(self.room_idle_grace_secs),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            default_room: default_room(),
            max_connections_per_room: None,
            room_idle_grace_secs: default_room_idle_grace_secs(),
            presence_timeout_secs: default_presence_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colab-hub".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_room() -> String {
    "default".to_string()
}

fn default_room_idle_grace_secs() -> u64 {
    60
}

fn default_presence_timeout_secs() -> u64 {
    30
}

fn default_maintenance_interval_secs() -> u64 {
    15
}

fn default_outbound_queue_capacity() -> usize {
    256
}
