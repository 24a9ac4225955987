//! # Configuration Loader
//!
//! Builds an [`EngineConfig`] from layered sources using the `config` crate.
//! Later layers win:
//!
//! 1. Struct defaults
//! 2. Optional configuration file (explicit path or `SCANENGINE_CONFIG`)
//! 3. Nested environment variables, `SCANENGINE__BUS__HOST=bus`
//! 4. Legacy flat environment variables, `SCANENGINE_BUSHOST=bus`
//! 5. Command-line overrides

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use crate::constants::ENV_PREFIX;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Legacy flat variable suffixes and the keys they map to
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("BUSHOST", "bus.host"),
    ("BUSPORT", "bus.port"),
    ("WORKERS", "workers.count"),
    ("LOGLEVEL", "logging.level"),
];

/// Values supplied on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub bus_host: Option<String>,
    pub bus_port: Option<u16>,
    pub workers: Option<i64>,
    pub log_level: Option<String>,
}

/// Loaded, validated configuration and where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
    source: Option<PathBuf>,
    warnings: Vec<String>,
}

impl ConfigManager {
    /// Load configuration without command-line overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    /// Load configuration, applying `overrides` last
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> ConfigResult<Self> {
        let source = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(format!("{ENV_PREFIX}_CONFIG")).map(PathBuf::from));

        let mut builder = ::config::Config::builder();

        if let Some(file) = &source {
            if !file.exists() {
                return Err(ConfigurationError::invalid_value(
                    "config",
                    file.display(),
                    "configuration file does not exist",
                ));
            }
            debug!(path = %file.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(file.as_path()).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (suffix, key) in LEGACY_ENV_KEYS {
            if let Ok(value) = env::var(format!("{ENV_PREFIX}_{suffix}")) {
                builder = builder.set_override(*key, value)?;
            }
        }

        builder = builder
            .set_override_option("bus.host", overrides.bus_host.clone())?
            .set_override_option("bus.port", overrides.bus_port.map(i64::from))?
            .set_override_option("workers.count", overrides.workers)?
            .set_override_option("logging.level", overrides.log_level.clone())?;

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        Self::from_config(config, source)
    }

    /// Validate an already-built configuration
    pub fn from_config(config: EngineConfig, source: Option<PathBuf>) -> ConfigResult<Self> {
        config.validate()?;

        let mut warnings = Vec::new();
        if config.workers.count < 1 {
            warnings.push(format!(
                "workers.count {} is below 1, using {}",
                config.workers.count,
                config.worker_count()
            ));
        }
        if config.queue.capacity < config.worker_count() {
            warnings.push(format!(
                "queue.capacity {} is below the worker count, using {}",
                config.queue.capacity,
                config.work_queue_capacity()
            ));
        }
        for warning in &warnings {
            warn!("{warning}");
        }

        info!(
            endpoint = %config.bus.endpoint(),
            workers = config.worker_count(),
            queue_capacity = config.work_queue_capacity(),
            source = ?source,
            "⚙️ Configuration loaded"
        );

        Ok(Self {
            config,
            source,
            warnings,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    /// Values that were adjusted while loading
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
