//! Process configuration.
//!
//! Loaded once at startup: defaults, then the YAML file named by `STOREFRONT_CONFIG` (if set),
//! then individual environment variable overrides. The result is validated and never changes
//! afterwards. `main` loads a `.env` file into the process environment first, if one exists.
//!
//! The store endpoint and database can also be given as `MONGODB_URI` and `MONGODB_DATABASE`;
//! `STORE_URI` and `STORE_DATABASE` win when both are set.
//!
//! ```yaml
//! host: 0.0.0.0
//! store:
//!   uri: mongodb://localhost:27017
//!   database: storefront
//! services:
//!   orders_port: 8081
//!   products_port: 8082
//!   users_port: 8083
//! scheduler:
//!   enabled: true
//!   run_at: "00:00"
//! transaction:
//!   max_attempts: 8
//! log:
//!   level: info
//!   json: false
//! ```

use crate::framework::DEFAULT_MAX_ATTEMPTS;
use crate::scheduler::DailySchedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_PATH_VAR: &str = "STOREFRONT_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub store: StoreConfig,
    pub services: ServicesConfig,
    pub scheduler: SchedulerConfig,
    pub transaction: TransactionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection endpoint: `mongodb://...`, or `memory://<name>` for an in-process store.
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub orders_port: u16,
    pub products_port: u16,
    pub users_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC wall-clock time of the daily batch run, `HH:MM`.
    pub run_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            store: StoreConfig::default(),
            services: ServicesConfig::default(),
            scheduler: SchedulerConfig::default(),
            transaction: TransactionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "storefront".to_string(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            orders_port: 8081,
            products_port: 8082,
            users_port: 8083,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_at: "00:00".to_string(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        for key in ["MONGODB_URI", "STORE_URI"] {
            if let Some(uri) = lookup(key) {
                self.store.uri = uri;
            }
        }
        for key in ["MONGODB_DATABASE", "STORE_DATABASE"] {
            if let Some(database) = lookup(key) {
                self.store.database = database;
            }
        }
        if let Some(port) = lookup("ORDERS_PORT") {
            self.services.orders_port = parse_var("ORDERS_PORT", port)?;
        }
        if let Some(port) = lookup("PRODUCTS_PORT") {
            self.services.products_port = parse_var("PRODUCTS_PORT", port)?;
        }
        if let Some(port) = lookup("USERS_PORT") {
            self.services.users_port = parse_var("USERS_PORT", port)?;
        }
        if let Some(run_at) = lookup("SCHEDULER_RUN_AT") {
            self.scheduler.run_at = run_at;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.uri.trim().is_empty() {
            return Err(invalid("store.uri", &self.store.uri, "must not be empty"));
        }
        if self.store.database.trim().is_empty() {
            return Err(invalid("store.database", &self.store.database, "must not be empty"));
        }
        self.schedule()?;
        if self.transaction.max_attempts == 0 {
            return Err(invalid("transaction.max_attempts", "0", "must be at least 1"));
        }

        let ports = [
            ("services.orders_port", self.services.orders_port),
            ("services.products_port", self.services.products_port),
            ("services.users_port", self.services.users_port),
        ];
        for (i, (key, port)) in ports.iter().enumerate() {
            if *port != 0 && ports[..i].iter().any(|(_, other)| other == port) {
                return Err(invalid(*key, &port.to_string(), "port already used by another service"));
            }
        }
        Ok(())
    }

    /// The configured daily run time.
    pub fn schedule(&self) -> Result<DailySchedule, ConfigError> {
        DailySchedule::parse(&self.scheduler.run_at)
            .map_err(|e| invalid("scheduler.run_at", &self.scheduler.run_at, &e.to_string()))
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
        value,
    })
}
