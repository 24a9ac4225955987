//! # NATS JetStream Bus
//!
//! [`MessageBus`] over NATS with JetStream persistence. Requests are pulled
//! from a durable explicit-ack consumer on the `scan-engine` stream; results
//! are published to the collector subject with a persistence acknowledgement.
//!
//! Connection-level events arrive on the client's event callback and are
//! forwarded to the fault supervisor: a disconnect is fatal, server and client
//! errors are logged and survived.

use super::bus::{ensure_stream, MessageBus, StreamDescriptor, StreamProvisioner, Subscription};
use super::errors::{MessagingError, MessagingResult};
use super::message::ScanResult;
use super::pull_loop::{
    spawn_pull_loop, PullLoopHandle, PullLoopOptions, PullSource, PulledMessage,
};
use crate::config::EngineConfig;
use crate::constants::bus::{
    DURABLE_NAME, MAX_WAITING_PULLS, REQUEST_SUBJECT, RESULT_SUBJECT, STREAM_NAME,
};
use crate::health::SubscriptionHealth;
use crate::supervisor::{FaultEvent, FaultReporter};
use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_nats::jetstream::context::GetStreamErrorKind;
use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// JetStream-backed message bus
pub struct NatsJetStreamBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    endpoint: String,
    consumer_config: consumer::pull::Config,
    pull_options: PullLoopOptions,
    drain_timeout: Duration,
    faults: FaultReporter,
    pull_loop: Mutex<Option<PullLoopHandle>>,
    health: Mutex<Option<SubscriptionHealth>>,
}

impl fmt::Debug for NatsJetStreamBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsJetStreamBus")
            .field("endpoint", &self.endpoint)
            .field("durable", &DURABLE_NAME)
            .finish()
    }
}

impl NatsJetStreamBus {
    /// Connect, register the event callback and provision the request stream
    pub async fn connect(config: &EngineConfig, faults: FaultReporter) -> MessagingResult<Self> {
        let endpoint = config.bus.endpoint();
        info!(endpoint = %endpoint, "🔌 Connecting to NATS");

        let event_faults = faults.clone();
        let client = ConnectOptions::new()
            .name("scan-engine")
            .event_callback(move |event| {
                let faults = event_faults.clone();
                async move { forward_event(&faults, event) }
            })
            .connect(endpoint.as_str())
            .await
            .map_err(|e| MessagingError::connection(&endpoint, e.to_string()))?;

        let jetstream = jetstream::new(client.clone());
        let bus = Self {
            client,
            jetstream,
            endpoint,
            consumer_config: consumer_config(config),
            pull_options: config.pull_loop_options(),
            drain_timeout: config.bus.drain_timeout(),
            faults,
            pull_loop: Mutex::new(None),
            health: Mutex::new(None),
        };

        ensure_stream(&bus, &StreamDescriptor::scan_requests()).await?;
        info!(endpoint = %bus.endpoint, stream = STREAM_NAME, "✅ Connected to NATS JetStream");
        Ok(bus)
    }
}

/// Durable pull consumer settings
pub fn consumer_config(config: &EngineConfig) -> consumer::pull::Config {
    consumer::pull::Config {
        durable_name: Some(DURABLE_NAME.to_string()),
        filter_subject: REQUEST_SUBJECT.to_string(),
        ack_policy: consumer::AckPolicy::Explicit,
        ack_wait: config.bus.ack_wait(),
        max_deliver: config.bus.max_deliver,
        max_waiting: MAX_WAITING_PULLS,
        ..Default::default()
    }
}

fn forward_event(faults: &FaultReporter, event: Event) {
    match fault_for_event(&event) {
        Some(fault) => faults.report(fault),
        None => info!(event = %event, "NATS connection event"),
    }
}

/// Fault raised by a connection event, if any. Reconnects, lame duck mode,
/// slow consumers and the drain sequence are informational.
pub fn fault_for_event(event: &Event) -> Option<FaultEvent> {
    match event {
        Event::Disconnected => Some(FaultEvent::TransportDisconnected {
            detail: "unexpectedly disconnected from NATS".to_string(),
        }),
        Event::ServerError(e) => Some(FaultEvent::TransportError {
            detail: e.to_string(),
        }),
        Event::ClientError(e) => Some(FaultEvent::TransportError {
            detail: e.to_string(),
        }),
        _ => None,
    }
}

#[async_trait]
impl StreamProvisioner for NatsJetStreamBus {
    async fn stream_exists(&self, name: &str) -> MessagingResult<bool> {
        match self.jetstream.get_stream(name).await {
            Ok(_) => Ok(true),
            Err(err) => match err.kind() {
                GetStreamErrorKind::JetStream(e)
                    if e.error_code() == jetstream::ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(MessagingError::stream_provisioning(name, err.to_string())),
            },
        }
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> MessagingResult<()> {
        self.jetstream
            .create_stream(stream::Config {
                name: descriptor.name.clone(),
                subjects: descriptor.subjects.clone(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::stream_provisioning(&descriptor.name, e.to_string()))
    }
}

#[async_trait]
impl MessageBus for NatsJetStreamBus {
    async fn publish(&self, result: &ScanResult) -> MessagingResult<()> {
        let payload = result.to_payload()?;
        debug!(
            subject = RESULT_SUBJECT,
            scan_id = %result.scan_id,
            request_id = %result.request_id,
            bytes = payload.len(),
            "📤 Publishing scan result"
        );

        let ack = self
            .jetstream
            .publish(RESULT_SUBJECT.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| MessagingError::publish(RESULT_SUBJECT, e.to_string()))?;
        ack.await
            .map_err(|e| MessagingError::publish(RESULT_SUBJECT, e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, batch_size: usize) -> MessagingResult<Subscription> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| MessagingError::subscribe(DURABLE_NAME, e.to_string()))?;
        let consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(DURABLE_NAME, self.consumer_config.clone())
            .await
            .map_err(|e| MessagingError::subscribe(DURABLE_NAME, e.to_string()))?;

        let options = PullLoopOptions {
            batch_size: batch_size.max(1),
            ..self.pull_options.clone()
        };
        let (subscription, handle) =
            spawn_pull_loop(JetStreamSource { consumer }, options, self.faults.clone());

        if let Some(previous) = self.pull_loop.lock().replace(handle) {
            warn!("Replacing an active subscription, the previous pull loop is stopped");
            previous.abort();
        }
        *self.health.lock() = Some(subscription.health().clone());

        info!(
            durable = DURABLE_NAME,
            subject = REQUEST_SUBJECT,
            batch_size,
            "📥 Subscribed to scan requests"
        );
        Ok(subscription)
    }

    async fn close(&self) -> MessagingResult<()> {
        let handle = self.pull_loop.lock().take();
        if let Some(handle) = handle {
            handle.shutdown(self.drain_timeout).await;
        }

        // Flushes pending publishes, then closes the connection
        self.client
            .drain()
            .await
            .map_err(|e| MessagingError::connection(&self.endpoint, e.to_string()))?;
        info!(endpoint = %self.endpoint, "NATS session drained and closed");
        Ok(())
    }

    fn health(&self) -> Option<SubscriptionHealth> {
        self.health.lock().clone()
    }
}

/// Batched fetch against the durable pull consumer
struct JetStreamSource {
    consumer: consumer::PullConsumer,
}

#[async_trait]
impl PullSource for JetStreamSource {
    type Message = JetStreamMessage;

    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> MessagingResult<Vec<JetStreamMessage>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .map_err(|e| MessagingError::fetch(e.to_string()))?;

        let mut messages = Vec::with_capacity(max_messages);
        while let Some(next) = batch.next().await {
            match next {
                Ok(message) => messages.push(JetStreamMessage { inner: message }),
                // Already-received messages are still delivered; the error
                // surfaces on the next fetch if it persists.
                Err(e) if !messages.is_empty() => {
                    warn!(error = %e, received = messages.len(), "Batch ended early");
                    break;
                }
                Err(e) => return Err(MessagingError::fetch(e.to_string())),
            }
        }
        Ok(messages)
    }
}

struct JetStreamMessage {
    inner: jetstream::Message,
}

#[async_trait]
impl PulledMessage for JetStreamMessage {
    fn payload(&self) -> Bytes {
        self.inner.message.payload.clone()
    }

    async fn ack(&self) -> MessagingResult<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| MessagingError::acknowledgement("ack", e.to_string()))
    }

    async fn nak(&self, delay: Option<Duration>) -> MessagingResult<()> {
        self.inner
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| MessagingError::acknowledgement("nak", e.to_string()))
    }

    async fn in_progress(&self) -> MessagingResult<()> {
        self.inner
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| MessagingError::acknowledgement("in_progress", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config() {
        let mut config = EngineConfig::default();
        config.bus.ack_wait_secs = 120;
        config.bus.max_deliver = 3;

        let consumer = consumer_config(&config);
        assert_eq!(consumer.durable_name.as_deref(), Some("engine"));
        assert_eq!(consumer.filter_subject, "scan-engine.scans");
        assert_eq!(consumer.ack_policy, consumer::AckPolicy::Explicit);
        assert_eq!(consumer.ack_wait, Duration::from_secs(120));
        assert_eq!(consumer.max_deliver, 3);
        assert_eq!(consumer.max_waiting, 128);
    }

    #[test]
    fn test_disconnect_is_fatal_and_errors_are_not() {
        let fault = fault_for_event(&Event::Disconnected).unwrap();
        assert!(matches!(fault, FaultEvent::TransportDisconnected { .. }));
        assert!(fault.is_fatal());

        let fault = fault_for_event(&Event::ServerError(async_nats::ServerError::Other(
            "maximum payload exceeded".to_string(),
        )))
        .unwrap();
        assert!(
            matches!(fault, FaultEvent::TransportError { ref detail } if detail.contains("maximum payload"))
        );
        assert!(!fault.is_fatal());

        let fault = fault_for_event(&Event::ClientError(async_nats::ClientError::Other(
            "flush failed".to_string(),
        )))
        .unwrap();
        assert!(matches!(fault, FaultEvent::TransportError { .. }));
        assert!(!fault.is_fatal());
    }

    #[test]
    fn test_lifecycle_events_raise_no_fault() {
        for event in [
            Event::Connected,
            Event::LameDuckMode,
            Event::SlowConsumer(7),
        ] {
            assert_eq!(fault_for_event(&event), None, "{event}");
        }
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let mut config = EngineConfig::default();
        config.bus.host = "127.0.0.1".to_string();
        config.bus.port = 1;
        let (faults, _supervisor) = crate::supervisor::Supervisor::channel();

        let err = NatsJetStreamBus::connect(&config, faults).await.unwrap_err();
        assert!(matches!(err, MessagingError::Connection { .. }));
    }
}
