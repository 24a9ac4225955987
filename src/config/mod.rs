//! # Scan Engine Configuration
//!
//! Typed configuration for the dispatcher. Values are layered by
//! [`ConfigManager`]: built-in defaults, an optional YAML/TOML file, nested
//! `SCANENGINE__SECTION__FIELD` environment variables, the legacy flat
//! variables of earlier deployments (`SCANENGINE_BUSHOST`,
//! `SCANENGINE_BUSPORT`, `SCANENGINE_WORKERS`, `SCANENGINE_LOGLEVEL`) and
//! finally command-line overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scan_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(None)?;
//! let config = manager.config();
//!
//! println!("bus endpoint: {}", config.bus.endpoint());
//! println!("workers: {}", config.worker_count());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::messaging::PullLoopOptions;
use crate::scanning::{ScanOptions, TimingTemplate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{ConfigManager, ConfigOverrides};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Message bus connection and consumer settings
    pub bus: BusConfig,

    /// Worker pool sizing
    pub workers: WorkerConfig,

    /// Work queue sizing
    pub queue: QueueConfig,

    /// Pull loop pacing and circuit breaker threshold
    pub subscription: SubscriptionConfig,

    /// External scan engine invocation
    pub scanner: ScannerConfig,

    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Validate required fields and ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bus.host.trim().is_empty() {
            return Err(ConfigurationError::missing_field("bus.host"));
        }
        if self.bus.port == 0 {
            return Err(ConfigurationError::missing_field("bus.port"));
        }
        if self.bus.ack_wait_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "bus.ack_wait_secs",
                self.bus.ack_wait_secs,
                "must be greater than zero",
            ));
        }
        if self.subscription.fetch_timeout_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "subscription.fetch_timeout_secs",
                self.subscription.fetch_timeout_secs,
                "must be greater than zero",
            ));
        }
        if self.subscription.max_consecutive_fetch_errors == 0 {
            return Err(ConfigurationError::invalid_value(
                "subscription.max_consecutive_fetch_errors",
                self.subscription.max_consecutive_fetch_errors,
                "must be greater than zero",
            ));
        }
        if self.subscription.progress_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "subscription.progress_interval_secs",
                self.subscription.progress_interval_secs,
                "must be greater than zero",
            ));
        }
        if self.scanner.binary.trim().is_empty() {
            return Err(ConfigurationError::missing_field("scanner.binary"));
        }
        Ok(())
    }

    /// Number of workers, with values below one replaced by the default
    pub fn worker_count(&self) -> usize {
        self.workers.effective_count()
    }

    /// Work queue capacity, never smaller than the worker pool so a full fetch
    /// batch can always be absorbed
    pub fn work_queue_capacity(&self) -> usize {
        self.queue.capacity.max(self.worker_count())
    }

    /// Pull loop options; the fetch batch size follows the worker count
    pub fn pull_loop_options(&self) -> PullLoopOptions {
        PullLoopOptions {
            batch_size: self.worker_count(),
            fetch_timeout: Duration::from_secs(self.subscription.fetch_timeout_secs),
            max_consecutive_errors: self.subscription.max_consecutive_fetch_errors,
            retry_delay: Duration::from_millis(self.subscription.fetch_retry_delay_ms),
            progress_interval: Duration::from_secs(self.subscription.progress_interval_secs),
            nak_delay: self.bus.nak_delay_secs.map(Duration::from_secs),
        }
    }
}

/// Transport implementations, selected by type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusTransport {
    /// NATS with JetStream persistence
    #[default]
    Nats,
}

impl BusTransport {
    pub fn scheme(self) -> &'static str {
        match self {
            BusTransport::Nats => "nats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub transport: BusTransport,
    pub host: String,
    pub port: u16,
    /// How long the server waits for a verdict before redelivering
    pub ack_wait_secs: u64,
    /// Delivery attempts before the server gives up on a message
    pub max_deliver: i64,
    /// Delay before a nak'd message is redelivered; server default when unset
    pub nak_delay_secs: Option<u64>,
    /// Time given to in-flight messages to settle on close
    pub drain_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: BusTransport::default(),
            host: String::new(),
            port: 0,
            ack_wait_secs: defaults::ACK_WAIT_SECS,
            max_deliver: defaults::MAX_DELIVER,
            nak_delay_secs: None,
            drain_timeout_secs: defaults::DRAIN_TIMEOUT_SECS,
        }
    }
}

impl BusConfig {
    /// Transport URL, e.g. `nats://bus:4222`
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.transport.scheme(), self.host, self.port)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Signed so that nonsensical values can be reported and replaced
    pub count: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: defaults::WORKER_COUNT as i64,
        }
    }
}

impl WorkerConfig {
    pub fn effective_count(&self) -> usize {
        if self.count < 1 {
            defaults::WORKER_COUNT
        } else {
            usize::try_from(self.count).unwrap_or(defaults::WORKER_COUNT)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::WORK_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub fetch_timeout_secs: u64,
    /// Consecutive fetch failures tolerated before the pull loop halts
    pub max_consecutive_fetch_errors: u32,
    pub fetch_retry_delay_ms: u64,
    pub progress_interval_secs: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            max_consecutive_fetch_errors: defaults::MAX_CONSECUTIVE_FETCH_ERRORS,
            fetch_retry_delay_ms: defaults::FETCH_RETRY_DELAY_MS,
            progress_interval_secs: defaults::PROGRESS_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub binary: String,
    pub vulnerability_script: String,
    /// Upper bound for a single scan; unbounded when unset
    pub timeout_secs: Option<u64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: defaults::SCANNER_BINARY.to_string(),
            vulnerability_script: defaults::VULNERABILITY_SCRIPT.to_string(),
            timeout_secs: None,
        }
    }
}

impl ScannerConfig {
    /// Options every scan runs with
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            service_detection: true,
            os_detection: true,
            scripts: vec![self.vulnerability_script.clone()],
            timing: TimingTemplate::Aggressive,
            open_hosts_only: true,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}
