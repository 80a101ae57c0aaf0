//! Control plane configuration
//!
//! Built once at startup from, in precedence order, command-line flags,
//! environment variables (both resolved by the binary) and a YAML config
//! file, then shared read-only as `Arc<Config>`.

use crate::domain::model::StorageType;
use crate::domain::ports::PoolSpec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Configuration Sections
// =============================================================================

/// Metadata store selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` or `file`
    #[serde(default = "default_db_driver")]
    pub driver: String,
    /// Root directory for the `file` driver
    #[serde(default)]
    pub endpoint: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_db_driver(),
            endpoint: String::new(),
        }
    }
}

/// Authentication collaborator the gateway runs in front of the core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStrategy {
    #[default]
    Noauth,
    Keystone,
}

impl std::str::FromStr for AuthStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "noauth" => Ok(AuthStrategy::Noauth),
            "keystone" => Ok(AuthStrategy::Keystone),
            other => Err(Error::Configuration(format!(
                "unknown auth_strategy '{}', expected noauth or keystone",
                other
            ))),
        }
    }
}

/// One backend: a dock and the drivers serving it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Provisioning driver
    pub driver_name: String,
    /// Driver-specific config file
    #[serde(default)]
    pub config_path: String,
    #[serde(default)]
    pub storage_type: StorageType,
    #[serde(default = "default_availability_zone")]
    pub availability_zone: String,
    #[serde(default)]
    pub replication_driver_name: Option<String>,
    #[serde(default)]
    pub metrics_driver_name: Option<String>,
    /// Dock locator; defaults to the api endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Host characteristics advertised on the dock
    #[serde(default)]
    pub host: BTreeMap<String, String>,
    /// Pools for drivers that take them from configuration
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

/// `backends:` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Comma-separated backend names to start
    #[serde(default)]
    pub enabled: String,
    #[serde(flatten)]
    pub entries: BTreeMap<String, BackendConfig>,
}

impl BackendsConfig {
    pub fn enabled_names(&self) -> Vec<String> {
        self.enabled
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// =============================================================================
// Config
// =============================================================================

/// Immutable process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default)]
    pub db: DatabaseConfig,
    #[serde(default)]
    pub auth_strategy: AuthStrategy,
    #[serde(default)]
    pub backends: BackendsConfig,
    /// Node the docks run on
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Budget for a single driver call
    #[serde(default = "default_timeout_secs")]
    pub driver_timeout_secs: u64,
    /// Budget for retrying a driver's setup
    #[serde(default = "default_timeout_secs")]
    pub setup_timeout_secs: u64,
    /// Serialize calls into each driver instance
    #[serde(default = "default_true")]
    pub serialize_driver_calls: bool,
    /// Seconds between pool re-listings; 0 disables the refresh loop
    #[serde(default = "default_refresh_secs")]
    pub inventory_refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            db: DatabaseConfig::default(),
            auth_strategy: AuthStrategy::default(),
            backends: BackendsConfig::default(),
            node_id: default_node_id(),
            driver_timeout_secs: default_timeout_secs(),
            setup_timeout_secs: default_timeout_secs(),
            serialize_driver_calls: true,
            inventory_refresh_secs: default_refresh_secs(),
        }
    }
}

/// Values resolved from flags and environment, each overriding the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_endpoint: Option<String>,
    pub db_driver: Option<String>,
    pub db_endpoint: Option<String>,
    pub auth_strategy: Option<String>,
    pub enabled_backends: Option<String>,
    pub node_id: Option<String>,
    pub driver_timeout_secs: Option<u64>,
    pub inventory_refresh_secs: Option<u64>,
}

impl Config {
    /// Parse a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    /// Read the config file (if any), apply overrides and validate
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.apply(overrides)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(v) = overrides.api_endpoint {
            self.api_endpoint = v;
        }
        if let Some(v) = overrides.db_driver {
            self.db.driver = v;
        }
        if let Some(v) = overrides.db_endpoint {
            self.db.endpoint = v;
        }
        if let Some(v) = overrides.auth_strategy {
            self.auth_strategy = v.parse()?;
        }
        if let Some(v) = overrides.enabled_backends {
            self.backends.enabled = v;
        }
        if let Some(v) = overrides.node_id {
            self.node_id = v;
        }
        if let Some(v) = overrides.driver_timeout_secs {
            self.driver_timeout_secs = v;
        }
        if let Some(v) = overrides.inventory_refresh_secs {
            self.inventory_refresh_secs = v;
        }
        Ok(())
    }

    /// Reject configurations the process cannot start with
    pub fn validate(&self) -> Result<()> {
        match self.db.driver.as_str() {
            "memory" => {}
            "file" if !self.db.endpoint.is_empty() => {}
            "file" => {
                return Err(Error::Configuration(
                    "db.endpoint must name a directory for the file driver".into(),
                ))
            }
            other => {
                return Err(Error::Configuration(format!("unknown db.driver '{}'", other)))
            }
        }

        if self.driver_timeout_secs == 0 {
            return Err(Error::Configuration(
                "driver_timeout_secs must be positive".into(),
            ));
        }

        for name in self.backends.enabled_names() {
            let backend = self.backends.entries.get(&name).ok_or_else(|| {
                Error::Configuration(format!("backend '{}' is enabled but not defined", name))
            })?;
            if backend.driver_name.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "backend '{}' has no driver_name",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Enabled backends in configuration order, names filled in
    pub fn enabled_backends(&self) -> Vec<BackendConfig> {
        self.backends
            .enabled_names()
            .into_iter()
            .filter_map(|name| {
                self.backends.entries.get(&name).map(|b| {
                    let mut b = b.clone();
                    if b.name.is_empty() {
                        b.name = name.clone();
                    }
                    b
                })
            })
            .collect()
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    /// `None` when the refresh loop is off
    pub fn inventory_refresh(&self) -> Option<Duration> {
        (self.inventory_refresh_secs > 0).then(|| Duration::from_secs(self.inventory_refresh_secs))
    }
}

fn default_db_driver() -> String {
    "memory".to_string()
}

fn default_api_endpoint() -> String {
    "0.0.0.0:50049".to_string()
}

fn default_availability_zone() -> String {
    "default".to_string()
}

fn default_node_id() -> String {
    "localhost".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_refresh_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
