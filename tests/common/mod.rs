//! Shared test doubles: an in-memory message bus driven by the real pull loop
//! and a scripted scan executor.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use scan_engine::config::EngineConfig;
use scan_engine::health::SubscriptionHealth;
use scan_engine::messaging::{
    spawn_pull_loop, MessageBus, MessagingError, MessagingResult, PullLoopHandle, PullLoopOptions,
    PullSource, PulledMessage, ScanResult, Subscription,
};
use scan_engine::scanning::{ExecutorError, ScanExecutor, ScanJob, ScanOutput};
use scan_engine::supervisor::FaultReporter;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Configuration with a reachable-looking bus and fast pull loop pacing
pub fn test_config(workers: i64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.bus.host = "localhost".to_string();
    config.bus.port = 4222;
    config.workers.count = workers;
    config
}

pub fn fast_pull_options(batch_size: usize, max_consecutive_errors: u32) -> PullLoopOptions {
    PullLoopOptions {
        batch_size,
        fetch_timeout: Duration::from_millis(20),
        max_consecutive_errors,
        retry_delay: Duration::from_millis(1),
        progress_interval: Duration::from_millis(50),
        nak_delay: None,
    }
}

pub fn request_payload(ip: &str, ports: &[u16], scan_id: &str, request_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ip": ip,
        "ports": ports,
        "scan_id": scan_id,
        "request_id": request_id,
    }))
    .unwrap()
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Everything the in-memory broker knows about message settlement
#[derive(Debug, Default)]
pub struct BrokerState {
    pub pending: VecDeque<(u64, Bytes)>,
    pub acked: Vec<u64>,
    pub naked: Vec<u64>,
    pub published: Vec<ScanResult>,
    pub fetch_failures_remaining: usize,
    pub fetch_failures_forever: bool,
    next_id: u64,
    /// Ids currently held by the consumer
    outstanding: HashSet<u64>,
    pub max_outstanding: usize,
}

struct MemoryMessage {
    id: u64,
    payload: Bytes,
    state: Arc<Mutex<BrokerState>>,
    redeliver: bool,
}

#[async_trait]
impl PulledMessage for MemoryMessage {
    fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    async fn ack(&self) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.outstanding.remove(&self.id);
        state.acked.push(self.id);
        Ok(())
    }

    async fn nak(&self, _delay: Option<Duration>) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.outstanding.remove(&self.id);
        state.naked.push(self.id);
        if self.redeliver {
            state.pending.push_back((self.id, self.payload.clone()));
        }
        Ok(())
    }

    async fn in_progress(&self) -> MessagingResult<()> {
        Ok(())
    }
}

struct MemorySource {
    state: Arc<Mutex<BrokerState>>,
    redeliver: bool,
}

#[async_trait]
impl PullSource for MemorySource {
    type Message = MemoryMessage;

    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> MessagingResult<Vec<MemoryMessage>> {
        let deadline = Instant::now() + expires;
        loop {
            {
                let mut state = self.state.lock();
                if state.fetch_failures_forever {
                    return Err(MessagingError::fetch("broker unavailable"));
                }
                if state.fetch_failures_remaining > 0 {
                    state.fetch_failures_remaining -= 1;
                    return Err(MessagingError::fetch("broker unavailable"));
                }

                let take = max_messages.min(state.pending.len());
                if take > 0 {
                    let batch: Vec<_> = state.pending.drain(..take).collect();
                    for (id, _) in &batch {
                        state.outstanding.insert(*id);
                    }
                    state.max_outstanding = state.max_outstanding.max(state.outstanding.len());
                    return Ok(batch
                        .into_iter()
                        .map(|(id, payload)| MemoryMessage {
                            id,
                            payload,
                            state: self.state.clone(),
                            redeliver: self.redeliver,
                        })
                        .collect());
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(Duration::from_millis(2)).await;
        }
    }
}

/// [`MessageBus`] backed by in-process queues and the real pull loop
#[derive(Debug)]
pub struct InMemoryBus {
    state: Arc<Mutex<BrokerState>>,
    options: PullLoopOptions,
    faults: FaultReporter,
    fail_publish: AtomicBool,
    redeliver_naks: bool,
    pull_loop: Mutex<Option<PullLoopHandle>>,
    health: Mutex<Option<SubscriptionHealth>>,
}

impl InMemoryBus {
    pub fn new(options: PullLoopOptions, faults: FaultReporter) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            options,
            faults,
            fail_publish: AtomicBool::new(false),
            redeliver_naks: false,
            pull_loop: Mutex::new(None),
            health: Mutex::new(None),
        })
    }

    /// Bus that puts nak'd messages back at the end of the queue
    pub fn redelivering(options: PullLoopOptions, faults: FaultReporter) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            options,
            faults,
            fail_publish: AtomicBool::new(false),
            redeliver_naks: true,
            pull_loop: Mutex::new(None),
            health: Mutex::new(None),
        })
    }

    /// Publish a request onto the inbound stream, returning its message id
    pub fn enqueue(&self, payload: impl Into<Bytes>) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back((id, payload.into()));
        id
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, count: usize) {
        self.state.lock().fetch_failures_remaining = count;
    }

    pub fn fail_fetches_forever(&self) {
        self.state.lock().fetch_failures_forever = true;
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, BrokerState> {
        self.state.lock()
    }

    pub fn acked(&self) -> Vec<u64> {
        let mut acked = self.state.lock().acked.clone();
        acked.sort_unstable();
        acked
    }

    pub fn naked(&self) -> Vec<u64> {
        let mut naked = self.state.lock().naked.clone();
        naked.sort_unstable();
        naked
    }

    pub fn published(&self) -> Vec<ScanResult> {
        self.state.lock().published.clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, result: &ScanResult) -> MessagingResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::publish(
                "scan-collector.scan-results",
                "no responders",
            ));
        }
        self.state.lock().published.push(result.clone());
        Ok(())
    }

    async fn subscribe(&self, batch_size: usize) -> MessagingResult<Subscription> {
        let source = MemorySource {
            state: self.state.clone(),
            redeliver: self.redeliver_naks,
        };
        let options = PullLoopOptions {
            batch_size,
            ..self.options.clone()
        };
        let (subscription, handle) = spawn_pull_loop(source, options, self.faults.clone());
        *self.pull_loop.lock() = Some(handle);
        *self.health.lock() = Some(subscription.health().clone());
        Ok(subscription)
    }

    async fn close(&self) -> MessagingResult<()> {
        let handle = self.pull_loop.lock().take();
        if let Some(handle) = handle {
            handle.shutdown(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    fn health(&self) -> Option<SubscriptionHealth> {
        self.health.lock().clone()
    }
}

/// How the scripted executor answers a job
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    /// Fail jobs whose target matches
    FailTarget(String),
    /// Fail the first n jobs, then succeed
    FailFirst(usize),
}

/// Executor that records every job and answers from a script
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Script,
    delay: Duration,
    /// Target that takes `.1` instead of `delay`
    slow_target: Option<(String, Duration)>,
    pub jobs: Mutex<Vec<ScanJob>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay,
            slow_target: None,
            jobs: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    /// Executor where one target takes `slow` and every other target `fast`
    pub fn with_slow_target(target: &str, slow: Duration, fast: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Succeed,
            delay: fast,
            slow_target: Some((target.to_string(), slow)),
            jobs: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[async_trait]
impl ScanExecutor for ScriptedExecutor {
    async fn run(&self, job: ScanJob) -> Result<ScanOutput, ExecutorError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let attempt = {
            let mut jobs = self.jobs.lock();
            jobs.push(job.clone());
            jobs.len()
        };

        let delay = match &self.slow_target {
            Some((target, slow)) if *target == job.target => *slow,
            _ => self.delay,
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.script {
            Script::FailTarget(target) if *target == job.target => Err(ExecutorError::Failed {
                status: Some(1),
                stderr: "Failed to resolve target".to_string(),
            }),
            Script::FailFirst(n) if attempt <= *n => Err(ExecutorError::Failed {
                status: Some(1),
                stderr: "Host seems down".to_string(),
            }),
            _ => Ok(ScanOutput {
                result: json!({
                    "host": job.target,
                    "ports": job.ports,
                }),
                warnings: Vec::new(),
            }),
        }
    }
}
