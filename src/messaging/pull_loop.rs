//! # Pull Loop
//!
//! Transport-agnostic pull/acknowledge state machine behind every
//! subscription. A transport adapter only supplies batched fetch and
//! per-message ack/nak through [`PullSource`] and [`PulledMessage`]; the loop
//! owns the policy:
//!
//! 1. Keep at most `batch_size` messages outstanding. Whenever fewer are
//!    outstanding, fetch the difference, waiting at most `fetch_timeout`.
//! 2. A failed fetch is counted by the fetch circuit breaker. Once consecutive
//!    failures exceed the threshold the loop halts, publishes `Halted` on the
//!    health channel and reports the halt to the fault supervisor.
//! 3. Each fetched message is emitted as an [`Envelope`]. The underlying
//!    message is acked or naked only after the consumer issues its verdict.
//!    While verdicts are outstanding the loop keeps the messages alive with
//!    in-progress signals.
//! 4. The failure counter resets whenever a message is settled with the
//!    transport. A slow message only holds its own slot, so the next fetch
//!    starts as soon as any verdict frees one.

use super::bus::Subscription;
use super::envelope::{AckVerdict, Envelope};
use super::errors::MessagingResult;
use crate::health::{HealthPublisher, SubscriptionState};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::supervisor::{FaultEvent, FaultReporter};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, OptionFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A message fetched from a pull source, settled exactly once by the loop
#[async_trait]
pub trait PulledMessage: Send + Sync + 'static {
    fn payload(&self) -> Bytes;

    async fn ack(&self) -> MessagingResult<()>;

    async fn nak(&self, delay: Option<Duration>) -> MessagingResult<()>;

    /// Extend the redelivery deadline while the message is still being worked on
    async fn in_progress(&self) -> MessagingResult<()>;
}

/// Batched fetch against a durable pull consumer
#[async_trait]
pub trait PullSource: Send + 'static {
    type Message: PulledMessage;

    /// Fetch up to `max_messages`, returning early when the batch fills and an
    /// empty batch when `expires` elapses with nothing available
    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> MessagingResult<Vec<Self::Message>>;
}

/// Pull loop tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullLoopOptions {
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub retry_delay: Duration,
    pub progress_interval: Duration,
    pub nak_delay: Option<Duration>,
}

/// Handle used by the bus to stop its pull loop
#[derive(Debug)]
pub struct PullLoopHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PullLoopHandle {
    /// Stop fetching and give outstanding messages `drain_timeout` to settle
    pub async fn shutdown(mut self, drain_timeout: Duration) {
        self.cancel.cancel();
        match timeout(drain_timeout, &mut self.join).await {
            Ok(Ok(())) => info!("Pull loop drained"),
            Ok(Err(e)) => warn!(error = %e, "Pull loop task ended abnormally"),
            Err(_) => {
                warn!(
                    drain_timeout_ms = drain_timeout.as_millis() as u64,
                    "Pull loop did not drain in time, unsettled messages will be redelivered"
                );
                self.join.abort();
            }
        }
    }

    /// Stop immediately without waiting for outstanding messages
    pub fn abort(&self) {
        self.cancel.cancel();
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the pull loop over `source`, returning the envelope sequence and the
/// handle that stops it
pub fn spawn_pull_loop<S: PullSource>(
    source: S,
    options: PullLoopOptions,
    faults: FaultReporter,
) -> (Subscription, PullLoopHandle) {
    let breaker = Arc::new(CircuitBreaker::new(
        "fetch",
        CircuitBreakerConfig {
            failure_threshold: options.max_consecutive_errors,
        },
    ));
    let (health_publisher, health) = HealthPublisher::new(breaker.clone());
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let pull_loop = PullLoop {
        source,
        options,
        breaker,
        health: health_publisher,
        out: tx,
        faults,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(pull_loop.run());

    (Subscription::new(rx, health), PullLoopHandle { cancel, join })
}

type FetchFuture<S> =
    BoxFuture<'static, (S, MessagingResult<Vec<<S as PullSource>::Message>>)>;

/// What woke the loop up
enum Step<'a, S: PullSource> {
    Cancelled,
    Fetched(S, MessagingResult<Vec<S::Message>>),
    Verdict(u64, AckVerdict),
    Emit(Result<mpsc::Permit<'a, Envelope>, mpsc::error::SendError<()>>),
    Progress,
    Idle,
}

/// Why the loop stopped accepting new messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    ConsumerGone,
    Halted,
}

struct PullLoop<S: PullSource> {
    source: S,
    options: PullLoopOptions,
    breaker: Arc<CircuitBreaker>,
    health: HealthPublisher,
    out: mpsc::Sender<Envelope>,
    faults: FaultReporter,
    cancel: CancellationToken,
}

impl<S: PullSource> PullLoop<S> {
    async fn run(self) {
        let PullLoop {
            source,
            options,
            breaker,
            health,
            out,
            faults,
            cancel,
        } = self;
        info!(
            batch_size = options.batch_size,
            fetch_timeout_ms = options.fetch_timeout.as_millis() as u64,
            max_consecutive_errors = options.max_consecutive_errors,
            "📥 Pull loop started"
        );

        let batch_size = options.batch_size.max(1);
        let period = options.progress_interval.max(Duration::from_millis(1));

        let mut source = Some(source);
        let mut fetch: Option<FetchFuture<S>> = None;
        let mut backoff: Option<Duration> = None;
        let mut out = Some(out);
        let mut stop: Option<StopReason> = None;

        // Fetched and not yet settled with the transport, keyed by delivery id
        let mut in_flight: HashMap<u64, S::Message> = HashMap::new();
        let mut verdicts: FuturesUnordered<BoxFuture<'static, (u64, AckVerdict)>> =
            FuturesUnordered::new();
        let mut unsent: VecDeque<Envelope> = VecDeque::new();
        let mut next_id = 0u64;

        let mut progress = interval_at(Instant::now() + period, period);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(reason) = stop {
                if out.take().is_some() {
                    fetch = None;
                    debug!(?reason, unsent = unsent.len(), "Pull loop no longer accepting messages");
                    // Dropped envelopes nak through their handles
                    unsent.clear();
                }
                if in_flight.is_empty() {
                    break;
                }
            } else if fetch.is_none() && in_flight.len() < batch_size {
                if let Some(mut src) = source.take() {
                    let max_messages = batch_size - in_flight.len();
                    let expires = options.fetch_timeout;
                    let delay = backoff.take();
                    health.transition(SubscriptionState::Fetching);
                    fetch = Some(
                        async move {
                            if let Some(delay) = delay {
                                sleep(delay).await;
                            }
                            let fetched = src.fetch(max_messages, expires).await;
                            (src, fetched)
                        }
                        .boxed(),
                    );
                }
            }

            let step = tokio::select! {
                _ = cancel.cancelled(), if stop.is_none() => Step::Cancelled,
                Some((id, verdict)) = verdicts.next(), if !verdicts.is_empty() => {
                    Step::Verdict(id, verdict)
                }
                Some((src, fetched)) = OptionFuture::from(fetch.as_mut()), if fetch.is_some() => {
                    Step::Fetched(src, fetched)
                }
                permit = reserve(out.as_ref()), if !unsent.is_empty() && out.is_some() => {
                    Step::Emit(permit)
                }
                _ = progress.tick(), if !in_flight.is_empty() => Step::Progress,
                else => Step::Idle,
            };

            match step {
                Step::Cancelled => stop = Some(StopReason::Cancelled),
                Step::Idle => break,
                Step::Emit(Ok(permit)) => {
                    if let Some(envelope) = unsent.pop_front() {
                        permit.send(envelope);
                    }
                }
                Step::Emit(Err(_)) => {
                    info!("Envelope consumer dropped, stopping pull loop");
                    stop = Some(StopReason::ConsumerGone);
                }
                Step::Verdict(id, verdict) => {
                    if let Some(message) = in_flight.remove(&id) {
                        if settle(&message, verdict, options.nak_delay).await {
                            breaker.record_success();
                        }
                    }
                }
                Step::Progress => {
                    for message in in_flight.values() {
                        if let Err(e) = message.in_progress().await {
                            warn!(error = %e, "Failed to extend message deadline");
                        }
                    }
                }
                Step::Fetched(src, fetched) => {
                    fetch = None;
                    source = Some(src);
                    match fetched {
                        Err(e) => {
                            health.transition(SubscriptionState::ErrorCounting);
                            warn!(error = %e, "Fetch failed");

                            if breaker.record_failure() == CircuitState::Open {
                                let consecutive_errors = breaker.consecutive_failures();
                                health.transition(SubscriptionState::Halted);
                                error!(consecutive_errors, "🛑 Pull loop halted");
                                faults.report(FaultEvent::SubscriptionHalted { consecutive_errors });
                                stop = Some(StopReason::Halted);
                            } else {
                                backoff = Some(options.retry_delay);
                            }
                        }
                        Ok(batch) if batch.is_empty() => {
                            debug!("Fetch expired with no messages");
                        }
                        Ok(batch) => {
                            health.transition(SubscriptionState::Delivering);
                            debug!(
                                fetched = batch.len(),
                                outstanding = in_flight.len() + batch.len(),
                                "Batch fetched"
                            );
                            for message in batch {
                                next_id += 1;
                                let id = next_id;
                                let (envelope, verdict) = Envelope::new(message.payload());
                                verdicts.push(async move { (id, verdict.resolved().await) }.boxed());
                                unsent.push_back(envelope);
                                in_flight.insert(id, message);
                            }
                        }
                    }
                }
            }
        }

        info!(state = %health.state(), "Pull loop stopped");
    }
}

async fn reserve(
    out: Option<&mpsc::Sender<Envelope>>,
) -> Result<mpsc::Permit<'_, Envelope>, mpsc::error::SendError<()>> {
    match out {
        Some(out) => out.reserve().await,
        None => Err(mpsc::error::SendError(())),
    }
}

/// Settle one message with the transport, returning whether the transport
/// accepted the settlement
async fn settle<M: PulledMessage>(
    message: &M,
    verdict: AckVerdict,
    nak_delay: Option<Duration>,
) -> bool {
    let result = match verdict {
        AckVerdict::Ack => message.ack().await,
        AckVerdict::Nak => message.nak(nak_delay).await,
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, ?verdict, "Failed to settle message with transport");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessagingError;
    use crate::supervisor::Supervisor;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Ledger {
        acked: Vec<u64>,
        naked: Vec<u64>,
        progressed: Vec<u64>,
        requested: Vec<usize>,
    }

    impl Ledger {
        fn fetches(&self) -> usize {
            self.requested.len()
        }
    }

    struct FakeMessage {
        id: u64,
        payload: Bytes,
        ledger: Arc<Mutex<Ledger>>,
        fail_ack: bool,
    }

    #[async_trait]
    impl PulledMessage for FakeMessage {
        fn payload(&self) -> Bytes {
            self.payload.clone()
        }

        async fn ack(&self) -> MessagingResult<()> {
            if self.fail_ack {
                return Err(MessagingError::acknowledgement("ack", "closed"));
            }
            self.ledger.lock().acked.push(self.id);
            Ok(())
        }

        async fn nak(&self, _delay: Option<Duration>) -> MessagingResult<()> {
            if self.fail_ack {
                return Err(MessagingError::acknowledgement("nak", "closed"));
            }
            self.ledger.lock().naked.push(self.id);
            Ok(())
        }

        async fn in_progress(&self) -> MessagingResult<()> {
            self.ledger.lock().progressed.push(self.id);
            Ok(())
        }
    }

    /// One scripted fetch result
    enum Fetch {
        Batch(Vec<&'static str>),
        Fail,
        /// Nothing available for this long
        Quiet(u64),
    }

    /// Scripted fetch results; an exhausted script returns empty batches
    struct ScriptedSource {
        script: VecDeque<Fetch>,
        ledger: Arc<Mutex<Ledger>>,
        next_id: u64,
        fail_ack: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Fetch>) -> (Self, Arc<Mutex<Ledger>>) {
            let ledger = Arc::new(Mutex::new(Ledger::default()));
            (
                Self {
                    script: script.into(),
                    ledger: ledger.clone(),
                    next_id: 0,
                    fail_ack: false,
                },
                ledger,
            )
        }
    }

    #[async_trait]
    impl PullSource for ScriptedSource {
        type Message = FakeMessage;

        async fn fetch(
            &mut self,
            max_messages: usize,
            expires: Duration,
        ) -> MessagingResult<Vec<FakeMessage>> {
            self.ledger.lock().requested.push(max_messages);
            match self.script.pop_front() {
                Some(Fetch::Batch(payloads)) => {
                    assert!(payloads.len() <= max_messages);
                    Ok(payloads
                        .into_iter()
                        .map(|p| {
                            self.next_id += 1;
                            FakeMessage {
                                id: self.next_id,
                                payload: Bytes::from_static(p.as_bytes()),
                                ledger: self.ledger.clone(),
                                fail_ack: self.fail_ack,
                            }
                        })
                        .collect())
                }
                Some(Fetch::Fail) => Err(MessagingError::fetch("scripted failure")),
                Some(Fetch::Quiet(ms)) => {
                    sleep(Duration::from_millis(ms)).await;
                    Ok(Vec::new())
                }
                None => {
                    sleep(expires).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn options(max_consecutive_errors: u32) -> PullLoopOptions {
        PullLoopOptions {
            batch_size: 5,
            fetch_timeout: Duration::from_millis(20),
            max_consecutive_errors,
            retry_delay: Duration::ZERO,
            progress_interval: Duration::from_millis(10),
            nak_delay: None,
        }
    }

    #[tokio::test]
    async fn test_verdicts_map_to_ack_and_nak() {
        let (source, ledger) = ScriptedSource::new(vec![Fetch::Batch(vec!["a", "b", "c"])]);
        let (reporter, _supervisor) = Supervisor::channel();
        let (mut subscription, handle) = spawn_pull_loop(source, options(3), reporter);

        let first = subscription.next().await.unwrap();
        assert_eq!(first.data().as_ref(), b"a");
        first.ack();
        subscription.next().await.unwrap().nak();
        subscription.next().await.unwrap().ack();

        handle.shutdown(Duration::from_secs(1)).await;
        let ledger = ledger.lock();
        let mut acked = ledger.acked.clone();
        acked.sort_unstable();
        assert_eq!(acked, vec![1, 3]);
        assert_eq!(ledger.naked, vec![2]);
    }

    #[tokio::test]
    async fn test_refills_free_slots_while_a_message_is_outstanding() {
        let (source, ledger) = ScriptedSource::new(vec![
            Fetch::Batch(vec!["slow"]),
            Fetch::Batch(vec!["fast-1"]),
            Fetch::Batch(vec!["fast-2"]),
        ]);
        let (reporter, _supervisor) = Supervisor::channel();
        let mut opts = options(3);
        opts.batch_size = 2;
        let (mut subscription, handle) = spawn_pull_loop(source, opts, reporter);

        let slow = subscription.next().await.unwrap();
        assert_eq!(slow.data().as_ref(), b"slow");

        // The slow message holds one slot; the other keeps turning over
        let fast = subscription.next().await.unwrap();
        assert_eq!(fast.data().as_ref(), b"fast-1");
        fast.ack();
        let fast = subscription.next().await.unwrap();
        assert_eq!(fast.data().as_ref(), b"fast-2");
        fast.ack();

        sleep(Duration::from_millis(30)).await;
        assert!(ledger.lock().progressed.contains(&1));
        slow.ack();
        handle.shutdown(Duration::from_secs(1)).await;

        let ledger = ledger.lock();
        assert_eq!(ledger.acked, vec![2, 3, 1]);
        assert_eq!(&ledger.requested[..3], &[2, 1, 1]);
        assert!(ledger.requested.iter().all(|&n| n >= 1 && n <= 2));
    }

    #[tokio::test]
    async fn test_full_window_stops_fetching_until_a_verdict() {
        let (source, ledger) = ScriptedSource::new(vec![
            Fetch::Batch(vec!["a", "b"]),
            Fetch::Batch(vec!["c"]),
        ]);
        let (reporter, _supervisor) = Supervisor::channel();
        let mut opts = options(3);
        opts.batch_size = 2;
        let (mut subscription, handle) = spawn_pull_loop(source, opts, reporter);

        let a = subscription.next().await.unwrap();
        let b = subscription.next().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(ledger.lock().fetches(), 1);

        a.ack();
        let c = subscription.next().await.unwrap();
        assert_eq!(c.data().as_ref(), b"c");
        assert_eq!(ledger.lock().requested[1], 1);
        b.ack();
        c.ack();

        handle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(ledger.lock().acked.len(), 3);
    }

    #[tokio::test]
    async fn test_halts_after_consecutive_errors_exceed_threshold() {
        let (source, ledger) =
            ScriptedSource::new(vec![Fetch::Fail, Fetch::Fail, Fetch::Fail, Fetch::Fail]);
        let (reporter, mut supervisor) = Supervisor::channel();
        let (mut subscription, _handle) = spawn_pull_loop(source, options(3), reporter);

        let health = subscription.health().clone();
        assert!(health.wait_for_halt().await);
        assert!(subscription.next().await.is_none());
        assert_eq!(ledger.lock().fetches(), 4);
        assert_eq!(
            supervisor.wait_for_fault().await,
            FaultEvent::SubscriptionHalted {
                consecutive_errors: 4
            }
        );
    }

    #[tokio::test]
    async fn test_settlement_resets_error_counter() {
        let (source, ledger) = ScriptedSource::new(vec![
            Fetch::Fail,
            Fetch::Fail,
            Fetch::Batch(vec!["a"]),
            Fetch::Quiet(100),
            Fetch::Fail,
            Fetch::Fail,
        ]);
        let (reporter, mut supervisor) = Supervisor::channel();
        let (mut subscription, handle) = spawn_pull_loop(source, options(2), reporter);

        subscription.next().await.unwrap().ack();
        // Wait until the script is exhausted and the loop idles on empty batches
        while ledger.lock().fetches() < 7 {
            sleep(Duration::from_millis(5)).await;
        }

        assert!(!subscription.health().is_halted());
        assert_eq!(subscription.health().report().fetch_breaker.consecutive_failures, 2);
        assert!(supervisor.try_next().is_none());
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_failed_settlement_does_not_reset_counter() {
        let (mut source, _ledger) = ScriptedSource::new(vec![
            Fetch::Fail,
            Fetch::Batch(vec!["a"]),
            Fetch::Quiet(100),
            Fetch::Fail,
        ]);
        source.fail_ack = true;
        let (reporter, mut supervisor) = Supervisor::channel();
        let (mut subscription, _handle) = spawn_pull_loop(source, options(1), reporter);

        subscription.next().await.unwrap().ack();
        assert_eq!(
            supervisor.wait_for_fault().await,
            FaultEvent::SubscriptionHalted {
                consecutive_errors: 2
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_subscription_naks_and_stops() {
        let (source, ledger) = ScriptedSource::new(vec![Fetch::Batch(vec!["a", "b"])]);
        let (reporter, _supervisor) = Supervisor::channel();
        let (subscription, handle) = spawn_pull_loop(source, options(3), reporter);

        drop(subscription);
        sleep(Duration::from_millis(50)).await;

        assert!(handle.is_finished());
        let ledger = ledger.lock();
        let mut naked = ledger.naked.clone();
        naked.sort_unstable();
        assert_eq!(naked, vec![1, 2]);
        assert!(ledger.acked.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_naks_envelopes_never_handed_out() {
        let (source, ledger) = ScriptedSource::new(vec![Fetch::Batch(vec!["a", "b", "c"])]);
        let (reporter, _supervisor) = Supervisor::channel();
        let (mut subscription, handle) = spawn_pull_loop(source, options(3), reporter);

        let a = subscription.next().await.unwrap();
        a.ack();
        drop(subscription);
        handle.shutdown(Duration::from_secs(1)).await;

        let ledger = ledger.lock();
        assert_eq!(ledger.acked, vec![1]);
        let mut naked = ledger.naked.clone();
        naked.sort_unstable();
        assert_eq!(naked, vec![2, 3]);
    }
}
