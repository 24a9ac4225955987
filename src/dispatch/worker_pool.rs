//! # Worker Pool
//!
//! Fixed set of workers draining the work queue. For each item a worker runs
//! the scan, publishes the result and only then settles the envelope:
//!
//! | outcome                         | verdict | fault            |
//! |---------------------------------|---------|------------------|
//! | published                       | ack     |                  |
//! | request without ports           | ack     |                  |
//! | executor failed                 | nak     |                  |
//! | publish failed                  | nak     | `PublishFailed`  |
//!
//! A failing item never takes its worker down; the worker moves on to the
//! next item.

use super::work_queue::{WorkItem, WorkQueueReceiver};
use crate::logging::log_scan_operation;
use crate::messaging::{MessageBus, MessagingError, ScanRequest, ScanResult};
use crate::scanning::{ExecutorError, ScanExecutor, ScanJob, ScanOptions};
use crate::supervisor::{FaultEvent, FaultReporter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why a request could not be completed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Scan failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Result publish failed: {0}")]
    Publish(MessagingError),
}

impl WorkerError {
    /// Publish failures that are not specific to the message indicate a
    /// broken session and are escalated to the supervisor
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Executor(_) => false,
            WorkerError::Publish(e) => !e.is_per_message(),
        }
    }
}

/// Successful handling of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOutcome {
    Published,
    /// Request carried no ports; nothing to scan
    Skipped,
}

/// Point-in-time worker pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    pub workers: usize,
    pub published: u64,
    pub skipped: u64,
    pub scan_failures: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    skipped: AtomicU64,
    scan_failures: AtomicU64,
    publish_failures: AtomicU64,
}

/// Shared dependencies of every worker
#[derive(Debug, Clone)]
struct WorkerContext {
    queue: WorkQueueReceiver,
    executor: Arc<dyn ScanExecutor>,
    bus: Arc<dyn MessageBus>,
    options: ScanOptions,
    faults: FaultReporter,
    counters: Arc<Counters>,
}

/// Running worker pool
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `size` workers (minimum one) over `queue`
    pub fn start(
        size: usize,
        queue: WorkQueueReceiver,
        executor: Arc<dyn ScanExecutor>,
        bus: Arc<dyn MessageBus>,
        options: ScanOptions,
        faults: FaultReporter,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let context = WorkerContext {
            queue,
            executor,
            bus,
            options,
            faults,
            counters: counters.clone(),
        };

        let handles = (1..=size.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    context: context.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "👷 Worker pool started");
        Self { handles, counters }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            workers: self.handles.iter().filter(|h| !h.is_finished()).count(),
            published: self.counters.published.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            scan_failures: self.counters.scan_failures.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
        }
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Stop every worker immediately. Items a worker was holding are naked
    /// when their handles drop.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct Worker {
    id: usize,
    context: WorkerContext,
}

impl Worker {
    async fn run(self) {
        info!(worker_id = self.id, "Starting scan worker, waiting for work");

        while let Some(WorkItem { request, ack }) = self.context.queue.pop().await {
            match self.process(&request).await {
                Ok(outcome) => {
                    debug!(worker_id = self.id, ?outcome, "Work item complete");
                    ack.ack();
                }
                Err(e) => {
                    ack.nak();
                    self.record_failure(&request, &e);
                }
            }
        }

        info!(worker_id = self.id, "Work queue closed, worker exiting");
    }

    async fn process(&self, request: &ScanRequest) -> Result<WorkOutcome, WorkerError> {
        let counters = &self.context.counters;

        if !request.has_ports() {
            warn!(
                worker_id = self.id,
                scan_id = %request.scan_id,
                request_id = %request.request_id,
                "Request has no ports, skipping"
            );
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(WorkOutcome::Skipped);
        }

        log_scan_operation(
            "scan",
            self.id,
            &request.scan_id,
            &request.request_id,
            "started",
            Some(&request.ip),
        );
        let job = ScanJob::for_request(request, self.context.options.clone());
        let output = self.context.executor.run(job).await?;

        let result = ScanResult::for_request(request, output.result);
        self.context
            .bus
            .publish(&result)
            .await
            .map_err(WorkerError::Publish)?;

        counters.published.fetch_add(1, Ordering::Relaxed);
        log_scan_operation(
            "publish",
            self.id,
            &request.scan_id,
            &request.request_id,
            "completed",
            None,
        );
        Ok(WorkOutcome::Published)
    }

    fn record_failure(&self, request: &ScanRequest, err: &WorkerError) {
        let counters = &self.context.counters;
        match err {
            WorkerError::Executor(_) => {
                counters.scan_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id = self.id,
                    scan_id = %request.scan_id,
                    request_id = %request.request_id,
                    error = %err,
                    "❌ Scan failed, request returned to the bus"
                );
            }
            WorkerError::Publish(e) => {
                counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id = self.id,
                    scan_id = %request.scan_id,
                    request_id = %request.request_id,
                    error = %err,
                    "❌ Failed to publish scan result"
                );
                if err.is_fatal() {
                    self.context.faults.report(FaultEvent::PublishFailed {
                        scan_id: request.scan_id.clone(),
                        request_id: request.request_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
