#![allow(clippy::doc_markdown)] // Allow technical terms like JetStream, nmap in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Scan Engine
//!
//! Queue-driven port-scan dispatcher. Scan requests are pulled from a NATS
//! JetStream durable consumer, fanned out to a bounded pool of workers that
//! run nmap, and the results are published back to the bus for a collector.
//!
//! ## Delivery Guarantees
//!
//! A request message is acknowledged only after its result has been
//! published (or after it was found to carry no ports). Malformed requests,
//! failed scans and failed publishes are negatively acknowledged and
//! redelivered by the bus up to its delivery limit. Messages left unsettled
//! by a crash are redelivered once the acknowledgement window expires.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Wire formats, envelopes, pull loop and the NATS transport
//! - [`dispatch`] - Dispatch loop, work queue and worker pool
//! - [`scanning`] - Scan executor abstraction and the nmap implementation
//! - [`supervisor`] - Fault channel and fatal fault classification
//! - [`health`] - Observable subscription state
//! - [`resilience`] - Circuit breaker counting consecutive fetch failures
//! - [`config`] - Layered configuration
//! - [`engine`] - Component wiring and supervision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan_engine::config::ConfigManager;
//! use scan_engine::engine::ScanEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load(None)?.into_config();
//! scan_engine::logging::init_structured_logging(&config.logging);
//!
//! let engine = ScanEngine::bootstrap(&config).await?;
//! let fault = engine.run_until_fault().await;
//! eprintln!("scan engine stopped: {fault}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod messaging;
pub mod resilience;
pub mod scanning;
pub mod supervisor;

pub use config::{ConfigManager, EngineConfig};
pub use engine::{EngineStatus, ScanEngine};
pub use error::{EngineError, Result};
pub use supervisor::{FaultEvent, FaultReporter, Supervisor};
