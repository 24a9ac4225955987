//! Dispatch loop: envelopes in, work items out
//!
//! Decodes each envelope into a [`ScanRequest`]. Undecodable envelopes are
//! naked and never reach the queue; decoded requests are enqueued together
//! with the envelope's acknowledgement handle. The loop ends when the
//! subscription ends or no worker is left to take work.

use super::work_queue::{WorkItem, WorkQueue};
use crate::messaging::{Envelope, ScanRequest, Subscription};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// What happened to one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued,
    Rejected,
    /// Queue closed; the envelope was naked
    QueueClosed,
}

/// Totals reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub enqueued: u64,
    pub rejected: u64,
    /// `false` when the loop stopped because the queue closed
    pub subscription_ended: bool,
}

#[derive(Debug)]
pub struct DispatchLoop {
    subscription: Subscription,
    queue: WorkQueue,
}

impl DispatchLoop {
    pub fn new(subscription: Subscription, queue: WorkQueue) -> Self {
        Self {
            subscription,
            queue,
        }
    }

    pub async fn run(mut self) -> DispatchSummary {
        info!(
            queue_capacity = self.queue.capacity(),
            "🚦 Dispatch loop started"
        );
        let mut summary = DispatchSummary::default();

        while let Some(envelope) = self.subscription.next().await {
            match dispatch(&self.queue, envelope).await {
                DispatchOutcome::Enqueued => summary.enqueued += 1,
                DispatchOutcome::Rejected => summary.rejected += 1,
                DispatchOutcome::QueueClosed => {
                    error!("No workers left to take work, stopping dispatch");
                    info!(?summary, "Dispatch loop stopped");
                    return summary;
                }
            }
        }

        summary.subscription_ended = true;
        info!(
            state = %self.subscription.health().state(),
            ?summary,
            "Subscription ended, dispatch loop stopped"
        );
        summary
    }
}

/// Decode one envelope and hand it to the queue
pub async fn dispatch(queue: &WorkQueue, envelope: Envelope) -> DispatchOutcome {
    let (data, ack) = envelope.into_parts();
    debug!(payload = %String::from_utf8_lossy(&data), "Received envelope");

    let request = match ScanRequest::decode(&data) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, bytes = data.len(), "Unable to decode scan request, naking");
            ack.nak();
            return DispatchOutcome::Rejected;
        }
    };

    debug!(
        scan_id = %request.scan_id,
        request_id = %request.request_id,
        queue_depth = queue.depth(),
        "Enqueueing scan request"
    );
    match queue.push(WorkItem { request, ack }).await {
        Ok(()) => DispatchOutcome::Enqueued,
        Err(_) => DispatchOutcome::QueueClosed,
    }
}
