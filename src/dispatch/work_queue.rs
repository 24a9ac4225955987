//! Bounded FIFO of decoded scan requests
//!
//! The sending half belongs to the dispatch loop, the receiving half is shared
//! by every worker. Each item carries the acknowledgement handle of the
//! envelope it was decoded from, so the message stays unsettled until a worker
//! finishes with it.

use crate::messaging::{AckHandle, ScanRequest};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// A decoded request and the verdict hook of its envelope
#[derive(Debug)]
pub struct WorkItem {
    pub request: ScanRequest,
    pub ack: AckHandle,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkQueueError {
    #[error("Work queue is closed, no workers remain")]
    Closed,
}

/// Producer half. Cloneable; the queue closes once every clone is dropped.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

/// Consumer half shared by the workers
#[derive(Debug, Clone)]
pub struct WorkQueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` items (minimum one)
    pub fn bounded(capacity: usize) -> (WorkQueue, WorkQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            WorkQueue { tx },
            WorkQueueReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Enqueue, waiting while the queue is full. If every worker is gone the
    /// item's envelope is naked and `Closed` is returned.
    pub async fn push(&self, item: WorkItem) -> Result<(), WorkQueueError> {
        match self.tx.send(item).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(item)) => {
                warn!(
                    scan_id = %item.request.scan_id,
                    request_id = %item.request.request_id,
                    "Work queue closed, returning request to the bus"
                );
                item.ack.nak();
                Err(WorkQueueError::Closed)
            }
        }
    }

    /// Items currently waiting
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl WorkQueueReceiver {
    /// Next item in FIFO order; `None` once the queue is closed and drained
    pub async fn pop(&self) -> Option<WorkItem> {
        self.rx.lock().await.recv().await
    }
}
