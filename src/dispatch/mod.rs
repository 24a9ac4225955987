//! # Dispatch
//!
//! Fan-out from the subscription to the worker pool through a bounded queue.

pub mod dispatch_loop;
pub mod work_queue;
pub mod worker_pool;

pub use dispatch_loop::{dispatch, DispatchLoop, DispatchOutcome, DispatchSummary};
pub use work_queue::{WorkItem, WorkQueue, WorkQueueError, WorkQueueReceiver};
pub use worker_pool::{WorkOutcome, WorkerError, WorkerPool, WorkerPoolStats};
