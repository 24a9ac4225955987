//! # Fault Supervision
//!
//! Single sink for failures that cannot be handled where they occur:
//! asynchronous transport events, a halted subscription and failed result
//! publishes. Components hold a cloneable [`FaultReporter`]; the engine owns
//! the [`Supervisor`] and shuts the process down on the first fatal event.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Failure reported to the supervisor
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultEvent {
    #[error("Transport disconnected: {detail}")]
    TransportDisconnected { detail: String },

    #[error("Transport error: {detail}")]
    TransportError { detail: String },

    #[error("Subscription halted after {consecutive_errors} consecutive fetch errors")]
    SubscriptionHalted { consecutive_errors: u32 },

    #[error("Publish failed for scan {scan_id} (request {request_id}): {message}")]
    PublishFailed {
        scan_id: String,
        request_id: String,
        message: String,
    },

    #[error("Subscription ended unexpectedly")]
    SubscriptionEnded,
}

impl FaultEvent {
    /// Fatal events terminate the process; the rest are logged and survived
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FaultEvent::TransportError { .. })
    }
}

/// Cloneable sending half of the fault channel
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<FaultEvent>,
}

impl FaultReporter {
    pub fn report(&self, event: FaultEvent) {
        if event.is_fatal() {
            error!(fault = %event, "💥 Fatal fault reported");
        } else {
            warn!(fault = %event, "Non-fatal fault reported");
        }

        if self.tx.send(event).is_err() {
            warn!("Fault supervisor is gone, dropping fault report");
        }
    }
}

/// Receiving half of the fault channel
#[derive(Debug)]
pub struct Supervisor {
    rx: mpsc::UnboundedReceiver<FaultEvent>,
}

impl Supervisor {
    /// Create the fault channel
    pub fn channel() -> (FaultReporter, Supervisor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FaultReporter { tx }, Supervisor { rx })
    }

    /// Wait for the first fatal fault, logging non-fatal ones along the way.
    /// If every reporter is dropped the subscription can no longer make
    /// progress, which is itself fatal.
    pub async fn wait_for_fault(&mut self) -> FaultEvent {
        while let Some(event) = self.rx.recv().await {
            if event.is_fatal() {
                return event;
            }
        }
        FaultEvent::SubscriptionEnded
    }

    /// Non-blocking check, used by tests and health reporting
    pub fn try_next(&mut self) -> Option<FaultEvent> {
        self.rx.try_recv().ok()
    }
}
