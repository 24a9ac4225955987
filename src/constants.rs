//! # System Constants
//!
//! Fixed transport names and the default tunables that define the operational
//! boundaries of the scan engine. Stream and subject names are part of the
//! wire contract with the request producer and the result collector, so they
//! are deliberately not configurable.

/// JetStream stream names, subjects and consumer identities
pub mod bus {
    /// Stream provisioned at connect time
    pub const STREAM_NAME: &str = "scan-engine";
    /// Subject inbound scan requests are published on
    pub const REQUEST_SUBJECT: &str = "scan-engine.scans";
    /// Durable pull consumer shared by every engine instance
    pub const DURABLE_NAME: &str = "engine";
    /// Subject scan results are published on
    pub const RESULT_SUBJECT: &str = "scan-collector.scan-results";
    /// Outstanding pull requests the server keeps for the durable consumer
    pub const MAX_WAITING_PULLS: i64 = 128;
}

/// Default values applied when configuration leaves a field unset
pub mod defaults {
    pub const WORKER_COUNT: usize = 5;
    pub const WORK_QUEUE_CAPACITY: usize = 5;
    pub const FETCH_TIMEOUT_SECS: u64 = 10;
    pub const MAX_CONSECUTIVE_FETCH_ERRORS: u32 = 10;
    pub const FETCH_RETRY_DELAY_MS: u64 = 1_000;
    pub const PROGRESS_INTERVAL_SECS: u64 = 30;
    pub const ACK_WAIT_SECS: u64 = 600;
    pub const MAX_DELIVER: i64 = 5;
    pub const DRAIN_TIMEOUT_SECS: u64 = 5;
    pub const LOG_LEVEL: &str = "info";
    pub const SCANNER_BINARY: &str = "nmap";
    pub const VULNERABILITY_SCRIPT: &str = "./scipag_vulscan/vulscan.nse";
}

/// Prefix for every environment variable the engine reads
pub const ENV_PREFIX: &str = "SCANENGINE";
