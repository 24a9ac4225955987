//! # Scanning
//!
//! Scan execution behind a trait so workers stay independent of the external
//! scan engine.

pub mod executor;
pub mod nmap;
pub mod report;

pub use executor::{ExecutorError, ScanExecutor, ScanJob, ScanOptions, ScanOutput, TimingTemplate};
pub use nmap::NmapExecutor;
pub use report::NmapRun;
