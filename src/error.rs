//! Top-level error type for engine startup and the binary

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::supervisor::FaultEvent;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Fatal fault: {0}")]
    Fault(FaultEvent),
}

pub type Result<T> = std::result::Result<T, EngineError>;
