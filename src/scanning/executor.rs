//! Scan executor abstraction
//!
//! Workers hand a [`ScanJob`] to a [`ScanExecutor`] and wrap whatever comes
//! back into a scan result. The executor owns everything about the external
//! scan engine: argument construction, process management and the shape of
//! the structured report.

use crate::messaging::ScanRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Scan engine timing template, from slowest to fastest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingTemplate {
    Paranoid,
    Sneaky,
    Polite,
    Normal,
    Aggressive,
    Insane,
}

impl TimingTemplate {
    pub fn level(self) -> u8 {
        match self {
            TimingTemplate::Paranoid => 0,
            TimingTemplate::Sneaky => 1,
            TimingTemplate::Polite => 2,
            TimingTemplate::Normal => 3,
            TimingTemplate::Aggressive => 4,
            TimingTemplate::Insane => 5,
        }
    }
}

/// Fixed options applied to every scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub service_detection: bool,
    pub os_detection: bool,
    /// Scripts run against every open port
    pub scripts: Vec<String>,
    pub timing: TimingTemplate,
    /// Drop hosts with zero open ports from the report
    pub open_hosts_only: bool,
}

/// One invocation of the scan engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub target: String,
    pub ports: Vec<u16>,
    pub options: ScanOptions,
}

impl ScanJob {
    pub fn for_request(request: &ScanRequest, options: ScanOptions) -> Self {
        Self {
            target: request.ip.clone(),
            ports: request.ports.clone(),
            options,
        }
    }

    /// Ports in request order, comma separated
    pub fn port_list(&self) -> String {
        self.ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Reject jobs the scan engine cannot run safely
    pub fn validate(&self) -> Result<(), ExecutorError> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ExecutorError::invalid_job("target is empty"));
        }
        if target.starts_with('-') || target.chars().any(char::is_whitespace) {
            return Err(ExecutorError::invalid_job(format!(
                "target {:?} is not a host address",
                self.target
            )));
        }
        if self.ports.is_empty() {
            return Err(ExecutorError::invalid_job("no ports to scan"));
        }
        if self.ports.contains(&0) {
            return Err(ExecutorError::invalid_job("port 0 is not scannable"));
        }
        Ok(())
    }
}

/// Structured scan report plus non-fatal diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutput {
    pub result: serde_json::Value,
    pub warnings: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Invalid scan job: {reason}")]
    InvalidJob { reason: String },

    #[error("Failed to start {binary}: {message}")]
    Spawn { binary: String, message: String },

    #[error("Scan exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("Scan timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Unusable scan output: {message}")]
    Output { message: String },
}

impl ExecutorError {
    pub fn invalid_job(reason: impl Into<String>) -> Self {
        Self::InvalidJob {
            reason: reason.into(),
        }
    }

    pub fn spawn(binary: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            binary: binary.into(),
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }
}

/// Runs scans on behalf of the worker pool. Implementations must be safe to
/// call from every worker concurrently.
#[async_trait]
pub trait ScanExecutor: Send + Sync + fmt::Debug {
    async fn run(&self, job: ScanJob) -> Result<ScanOutput, ExecutorError>;
}
