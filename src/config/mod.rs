//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::aggregator::AggregatorConfig;
use crate::bridge::BridgeConfig;
use crate::bus::BusConfig;
use crate::reconciler::ReconcilerConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "braid.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BRAID_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BRAID";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BRAID_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Topic bus delivery settings.
    pub bus: BusConfig,
    /// Aggregation session settings.
    pub aggregator: AggregatorConfig,
    /// Live channel bridge settings.
    pub bridge: BridgeConfig,
    /// Reconciler settings.
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `braid.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregator.page_size == 0 {
            return Err(ConfigError::Invalid("aggregator.page_size must be > 0".into()));
        }
        if self.bus.subscriber_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.subscriber_queue_capacity must be > 0".into(),
            ));
        }
        if self.reconciler.change_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.change_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
