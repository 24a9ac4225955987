//! # Message Bus
//!
//! Transport abstraction the dispatcher is written against. A bus provisions
//! the request stream, hands out one [`Subscription`] of envelopes and
//! publishes scan results. The concrete transport is chosen by
//! [`BusTransport`] in configuration and built by [`connect`].

use super::envelope::Envelope;
use super::errors::MessagingResult;
use super::message::ScanResult;
use super::nats::NatsJetStreamBus;
use crate::config::{BusTransport, EngineConfig};
use crate::constants::bus::{REQUEST_SUBJECT, STREAM_NAME};
use crate::health::SubscriptionHealth;
use crate::supervisor::FaultReporter;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Ordered sequence of envelopes produced by a pull loop. Ends when the loop
/// halts or the bus is closed.
#[derive(Debug)]
pub struct Subscription {
    envelopes: mpsc::Receiver<Envelope>,
    health: SubscriptionHealth,
}

impl Subscription {
    pub fn new(envelopes: mpsc::Receiver<Envelope>, health: SubscriptionHealth) -> Self {
        Self { envelopes, health }
    }

    /// Next envelope, or `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<Envelope> {
        self.envelopes.recv().await
    }

    pub fn health(&self) -> &SubscriptionHealth {
        &self.health
    }
}

/// Messaging session with a persistent, acknowledging message bus
#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    /// Publish one scan result and wait for the bus to confirm persistence
    async fn publish(&self, result: &ScanResult) -> MessagingResult<()>;

    /// Start the pull loop against the durable consumer. `batch_size` bounds
    /// how many messages are outstanding at once.
    async fn subscribe(&self, batch_size: usize) -> MessagingResult<Subscription>;

    /// Stop fetching, let in-flight messages settle and release the session
    async fn close(&self) -> MessagingResult<()>;

    /// Health of the active subscription, if one has been started
    fn health(&self) -> Option<SubscriptionHealth>;
}

/// Name and subject set of a persistent stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
}

impl StreamDescriptor {
    /// The stream scan requests arrive on
    pub fn scan_requests() -> Self {
        Self {
            name: STREAM_NAME.to_string(),
            subjects: vec![REQUEST_SUBJECT.to_string()],
        }
    }
}

/// What [`ensure_stream`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

/// Stream administration primitives a transport exposes
#[async_trait]
pub trait StreamProvisioner: Send + Sync {
    /// `Ok(false)` only when the bus positively reports the stream as absent
    async fn stream_exists(&self, name: &str) -> MessagingResult<bool>;

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> MessagingResult<()>;
}

/// Create the stream unless it already exists. Safe to call on every start.
pub async fn ensure_stream<P>(
    provisioner: &P,
    descriptor: &StreamDescriptor,
) -> MessagingResult<ProvisionOutcome>
where
    P: StreamProvisioner + ?Sized,
{
    if provisioner.stream_exists(&descriptor.name).await? {
        debug!(stream = %descriptor.name, "Stream already provisioned");
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    provisioner.create_stream(descriptor).await?;
    info!(
        stream = %descriptor.name,
        subjects = ?descriptor.subjects,
        "✅ Stream created"
    );
    Ok(ProvisionOutcome::Created)
}

/// Connect the transport selected in configuration
pub async fn connect(
    config: &EngineConfig,
    faults: FaultReporter,
) -> MessagingResult<Arc<dyn MessageBus>> {
    match config.bus.transport {
        BusTransport::Nats => {
            let bus = NatsJetStreamBus::connect(config, faults).await?;
            Ok(Arc::new(bus))
        }
    }
}
