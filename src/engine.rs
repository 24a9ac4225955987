//! # Scan Engine
//!
//! Wires the components together and supervises them:
//!
//! ```text
//! bus ──Subscription──▶ DispatchLoop ──WorkQueue──▶ WorkerPool ──publish──▶ bus
//!                                                        │
//!                    FaultReporter ◀── transport events, halts, publish failures
//! ```
//!
//! The engine runs until the first fatal fault, then closes the bus and stops
//! the workers. Messages that were not settled are redelivered by the bus.

use crate::config::EngineConfig;
use crate::dispatch::{DispatchLoop, DispatchSummary, WorkQueue, WorkerPool, WorkerPoolStats};
use crate::error::{EngineError, Result};
use crate::health::{HealthReport, SubscriptionHealth};
use crate::messaging::{self, MessageBus};
use crate::scanning::{NmapExecutor, ScanExecutor};
use crate::supervisor::{FaultEvent, FaultReporter, Supervisor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Snapshot of the running engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub subscription: HealthReport,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub workers: WorkerPoolStats,
}

#[derive(Debug)]
pub struct ScanEngine {
    bus: Arc<dyn MessageBus>,
    queue: WorkQueue,
    pool: WorkerPool,
    dispatch: JoinHandle<DispatchSummary>,
    health: SubscriptionHealth,
    supervisor: Supervisor,
}

impl ScanEngine {
    /// Connect to the configured bus and start with the nmap executor
    pub async fn bootstrap(config: &EngineConfig) -> Result<Self> {
        let (faults, supervisor) = Supervisor::channel();
        let bus = messaging::connect(config, faults.clone()).await?;
        let executor: Arc<dyn ScanExecutor> = Arc::new(NmapExecutor::from_config(&config.scanner));
        Self::start(config, bus, executor, faults, supervisor).await
    }

    /// Start workers, then subscribe and begin dispatching
    pub async fn start(
        config: &EngineConfig,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn ScanExecutor>,
        faults: FaultReporter,
        supervisor: Supervisor,
    ) -> Result<Self> {
        let workers = config.worker_count();
        let (queue, receiver) = WorkQueue::bounded(config.work_queue_capacity());

        let pool = WorkerPool::start(
            workers,
            receiver,
            executor,
            bus.clone(),
            config.scanner.scan_options(),
            faults,
        );

        let subscription = match bus.subscribe(workers).await {
            Ok(subscription) => subscription,
            Err(e) => {
                pool.abort();
                return Err(e.into());
            }
        };
        let health = subscription.health().clone();
        let dispatch = tokio::spawn(DispatchLoop::new(subscription, queue.clone()).run());

        info!(
            workers,
            queue_capacity = queue.capacity(),
            "🚀 Scan engine started"
        );
        Ok(Self {
            bus,
            queue,
            pool,
            dispatch,
            health,
            supervisor,
        })
    }

    pub fn health(&self) -> &SubscriptionHealth {
        &self.health
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            subscription: self.health.report(),
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            workers: self.pool.stats(),
        }
    }

    /// Run until the first fatal fault and report it as an error. The engine
    /// has no clean stop, so this never returns `Ok`.
    pub async fn run(self) -> Result<()> {
        Err(EngineError::Fault(self.run_until_fault().await))
    }

    /// Run until the first fatal fault, then shut down and return it
    pub async fn run_until_fault(mut self) -> FaultEvent {
        let dispatch_result = tokio::select! {
            biased;
            fault = self.supervisor.wait_for_fault() => Err(fault),
            summary = &mut self.dispatch => Ok(summary),
        };

        let fault = match dispatch_result {
            Err(fault) => fault,
            Ok(summary) => {
                match summary {
                    Ok(summary) => info!(?summary, "Dispatch loop finished"),
                    Err(e) => error!(error = %e, "Dispatch loop task failed"),
                }
                // A halt is reported before the subscription ends; prefer its detail
                std::iter::from_fn(|| self.supervisor.try_next())
                    .find(FaultEvent::is_fatal)
                    .unwrap_or(FaultEvent::SubscriptionEnded)
            }
        };

        error!(fault = %fault, "🛑 Shutting down scan engine");
        self.shutdown().await;
        fault
    }

    async fn shutdown(self) {
        if let Err(e) = self.bus.close().await {
            warn!(error = %e, "Error while closing the bus");
        }
        self.dispatch.abort();
        self.pool.abort();
        info!(stats = ?self.pool.stats(), "Scan engine stopped");
    }
}
