//! # Messaging Module
//!
//! Message bus integration for the scan engine: the wire format of scan
//! requests and results, envelopes with deferred acknowledgement, the
//! transport-agnostic pull loop and the NATS JetStream transport.

pub mod bus;
pub mod envelope;
pub mod errors;
pub mod message;
pub mod nats;
pub mod pull_loop;

pub use bus::{
    connect, ensure_stream, MessageBus, ProvisionOutcome, StreamDescriptor, StreamProvisioner,
    Subscription,
};
pub use envelope::{AckHandle, AckVerdict, Envelope, PendingVerdict};
pub use errors::{MessagingError, MessagingResult};
pub use message::{ScanRequest, ScanResult};
pub use nats::NatsJetStreamBus;
pub use pull_loop::{spawn_pull_loop, PullLoopHandle, PullLoopOptions, PullSource, PulledMessage};
