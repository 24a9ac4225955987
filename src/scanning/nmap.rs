//! nmap-backed scan executor
//!
//! Runs `nmap` as a child process with XML output on stdout and parses the
//! report into an [`NmapRun`]. Hosts without open ports are dropped after
//! parsing so the hosts that remain keep their closed and filtered ports.
//! Anything written to stderr is kept as warnings.

use super::executor::{ExecutorError, ScanExecutor, ScanJob, ScanOutput};
use super::report::NmapRun;
use crate::config::ScannerConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NmapExecutor {
    binary: String,
    timeout: Option<Duration>,
}

impl NmapExecutor {
    pub fn new(binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(config.binary.clone(), config.timeout())
    }

    /// Command-line arguments for `job`; the target always comes last
    pub fn arguments(job: &ScanJob) -> Vec<String> {
        let options = &job.options;
        let mut args = Vec::new();

        if options.service_detection {
            args.push("-sV".to_string());
        }
        if options.os_detection {
            args.push("-O".to_string());
        }
        if !options.scripts.is_empty() {
            args.push("--script".to_string());
            args.push(options.scripts.join(","));
        }
        args.push(format!("-T{}", options.timing.level()));
        args.push("-p".to_string());
        args.push(job.port_list());
        args.push("-oX".to_string());
        args.push("-".to_string());
        args.push(job.target.clone());
        args
    }
}

#[async_trait]
impl ScanExecutor for NmapExecutor {
    async fn run(&self, job: ScanJob) -> Result<ScanOutput, ExecutorError> {
        job.validate()?;
        let args = Self::arguments(&job);
        debug!(binary = %self.binary, ?args, "Running scan");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::spawn(&self.binary, e.to_string()))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecutorError::Timeout {
                    timeout_secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ExecutorError::output(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ExecutorError::Failed {
                status: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let warnings: Vec<String> = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        for warning in &warnings {
            warn!(target_host = %job.target, "nmap: {warning}");
        }

        Ok(ScanOutput {
            result: structured_report(&output.stdout, job.options.open_hosts_only)?,
            warnings,
        })
    }
}

/// Parse an XML report and shape it for publication
pub fn structured_report(
    stdout: &[u8],
    open_hosts_only: bool,
) -> Result<serde_json::Value, ExecutorError> {
    let xml = std::str::from_utf8(stdout)
        .map_err(|e| ExecutorError::output(format!("report is not UTF-8: {e}")))?;
    let mut run = NmapRun::from_xml(xml)
        .map_err(|e| ExecutorError::output(format!("report is not nmap XML: {e}")))?;

    if open_hosts_only {
        let dropped = run.retain_hosts_with_open_ports();
        if dropped > 0 {
            debug!(dropped, remaining = run.hosts.len(), "Dropped hosts without open ports");
        }
    }

    serde_json::to_value(&run).map_err(|e| ExecutorError::output(e.to_string()))
}
