//! # Envelope
//!
//! One fetched transport message plus its pending acknowledgement decision.
//!
//! The decision travels as an [`AckHandle`]: a one-shot channel back to the
//! pull loop that owns the underlying transport message. Handles are consumed
//! by value, so a second verdict cannot be expressed, and a handle dropped
//! without a verdict naks on its way out so the message is redelivered rather
//! than left unsettled.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Verdict the consumer hands back for one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckVerdict {
    /// Processed successfully, remove from redelivery
    Ack,
    /// Failed, redeliver after the transport's configured delay
    Nak,
}

/// Acknowledgement hook carried alongside a message until it is settled
#[derive(Debug)]
pub struct AckHandle {
    tx: Option<oneshot::Sender<AckVerdict>>,
}

impl AckHandle {
    /// Create a handle and the receiver the transport side waits on
    pub fn pair() -> (Self, PendingVerdict) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, PendingVerdict { rx })
    }

    /// Positive acknowledgement
    pub fn ack(self) {
        self.settle(AckVerdict::Ack);
    }

    /// Negative acknowledgement
    pub fn nak(self) {
        self.settle(AckVerdict::Nak);
    }

    /// Issue the verdict, consuming the handle
    pub fn settle(mut self, verdict: AckVerdict) {
        self.send(verdict);
    }

    fn send(&mut self, verdict: AckVerdict) {
        if let Some(tx) = self.tx.take() {
            if tx.send(verdict).is_err() {
                // Pull loop already stopped; the transport redelivers after ack_wait.
                debug!(?verdict, "Verdict receiver dropped before settlement");
            }
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("Acknowledgement handle dropped without a verdict, issuing nak");
            self.send(AckVerdict::Nak);
        }
    }
}

/// Transport side of an [`AckHandle`]
#[derive(Debug)]
pub struct PendingVerdict {
    rx: oneshot::Receiver<AckVerdict>,
}

impl PendingVerdict {
    /// Wait for the verdict. A vanished handle counts as a nak.
    pub async fn resolved(self) -> AckVerdict {
        self.rx.await.unwrap_or(AckVerdict::Nak)
    }
}

/// A fetched message waiting for its acknowledgement decision
#[derive(Debug)]
pub struct Envelope {
    data: Bytes,
    ack: AckHandle,
}

impl Envelope {
    /// Wrap raw message data, returning the verdict receiver for the transport
    pub fn new(data: impl Into<Bytes>) -> (Self, PendingVerdict) {
        let (ack, pending) = AckHandle::pair();
        (
            Self {
                data: data.into(),
                ack,
            },
            pending,
        )
    }

    /// Raw message data
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn ack(self) {
        self.ack.ack();
    }

    pub fn nak(self) {
        self.ack.nak();
    }

    /// Split into data and the acknowledgement hook so the hook can travel
    /// further than the envelope itself
    pub fn into_parts(self) -> (Bytes, AckHandle) {
        (self.data, self.ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_is_delivered() {
        let (envelope, pending) = Envelope::new(&b"payload"[..]);
        assert_eq!(envelope.data().as_ref(), b"payload");

        envelope.ack();
        assert_eq!(pending.resolved().await, AckVerdict::Ack);
    }

    #[tokio::test]
    async fn test_nak_is_delivered() {
        let (envelope, pending) = Envelope::new(Vec::from("x"));
        envelope.nak();
        assert_eq!(pending.resolved().await, AckVerdict::Nak);
    }

    #[tokio::test]
    async fn test_dropped_handle_naks() {
        let (envelope, pending) = Envelope::new(Bytes::from_static(b"x"));
        let (_data, handle) = envelope.into_parts();
        drop(handle);

        assert_eq!(pending.resolved().await, AckVerdict::Nak);
    }

    #[tokio::test]
    async fn test_handle_survives_split() {
        let (envelope, pending) = Envelope::new(Bytes::from_static(b"x"));
        let (data, handle) = envelope.into_parts();
        assert_eq!(data.as_ref(), b"x");

        tokio::spawn(async move { handle.ack() }).await.unwrap();
        assert_eq!(pending.resolved().await, AckVerdict::Ack);
    }

    #[test]
    fn test_settle_after_receiver_gone_is_quiet() {
        let (handle, pending) = AckHandle::pair();
        drop(pending);
        handle.settle(AckVerdict::Ack);
    }
}
