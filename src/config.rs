//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for core settings.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};

/// Top-level application settings loaded from `Config.toml`
/// and then overridden (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Postgres URL of the primary store (corp info, outlines, stats, flow map)
    pub primary_database_url: String,

    /// Postgres URL of the secondary (legacy) store (company overview, classes)
    pub secondary_database_url: String,

    /// HTTP bind address for the API, metrics & health endpoints
    #[serde(default = "default_server_bind")]
    pub server_bind: String,

    /// CSV file loaded into `flow_map` at startup
    #[serde(default = "default_flowmap_csv_path")]
    pub flowmap_csv_path: PathBuf,

    /// Upper bound on connections per pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub startup: StartupSettings,
}

/// How the startup gate (migrations + CSV load) reacts to failure.
#[derive(Debug, Deserialize, Clone)]
pub struct StartupSettings {
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Fixed delay between attempts when `on_failure = "retry"` (e.g. "1s")
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the process on the first failed load.
    #[default]
    Abort,
    /// Keep retrying while the store is unreachable.
    Retry,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::default(),
            retry_interval: default_retry_interval(),
        }
    }
}

fn default_server_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_flowmap_csv_path() -> PathBuf {
    PathBuf::from("./source/mvc_map.csv")
}

fn default_max_connections() -> u32 {
    5
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

impl Settings {
    /// Load settings from `Config.toml` (if present),
    /// then apply any overrides from these environment variables:
    ///
    /// - `APP__PRIMARY_DATABASE_URL`
    /// - `APP__SECONDARY_DATABASE_URL`
    /// - `APP__SERVER_BIND`
    /// - `APP__FLOWMAP_CSV_PATH`
    /// - `APP__MAX_CONNECTIONS`
    /// - `APP__STARTUP_ON_FAILURE` (`abort` | `retry`)
    /// - `APP__STARTUP_RETRY_INTERVAL`
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config")
    }

    /// Same as [`Settings::new`] but reading an explicit config file stem.
    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        // Database URLs may come from the environment only, so seed empty
        // defaults and check them after the overrides.
        let cfg = Config::builder()
            .set_default("primary_database_url", "")?
            .set_default("secondary_database_url", "")?
            .add_source(File::with_name(name).required(false))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;

        Ok(settings)
    }

    /// Apply `APP__*` overrides, reading each variable through `var`.
    fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("APP__PRIMARY_DATABASE_URL") {
            self.primary_database_url = val;
        }
        if let Some(val) = var("APP__SECONDARY_DATABASE_URL") {
            self.secondary_database_url = val;
        }
        if let Some(val) = var("APP__SERVER_BIND") {
            self.server_bind = val;
        }
        if let Some(val) = var("APP__FLOWMAP_CSV_PATH") {
            self.flowmap_csv_path = PathBuf::from(val);
        }
        if let Some(val) = var("APP__MAX_CONNECTIONS") {
            self.max_connections = val.trim().parse().map_err(|_| {
                ConfigError::Message(format!(
                    "APP__MAX_CONNECTIONS must be a positive integer, got `{val}`"
                ))
            })?;
        }
        if let Some(val) = var("APP__STARTUP_ON_FAILURE") {
            self.startup.on_failure = match val.to_ascii_lowercase().as_str() {
                "abort" => FailurePolicy::Abort,
                "retry" => FailurePolicy::Retry,
                other => {
                    return Err(ConfigError::Message(format!(
                        "APP__STARTUP_ON_FAILURE must be `abort` or `retry`, got `{other}`"
                    )))
                }
            };
        }
        if let Some(val) = var("APP__STARTUP_RETRY_INTERVAL") {
            self.startup.retry_interval = humantime::parse_duration(&val)
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_database_url.is_empty() {
            return Err(ConfigError::NotFound("primary_database_url".into()));
        }
        if self.secondary_database_url.is_empty() {
            return Err(ConfigError::NotFound("secondary_database_url".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Message("max_connections must be at least 1".into()));
        }
        Ok(())
    }
}
