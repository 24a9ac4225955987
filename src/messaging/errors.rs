//! # Messaging Error Types
//!
//! Structured error handling for the message bus using thiserror instead of
//! `Box<dyn Error>` patterns. Each variant names the transport operation that
//! failed so log lines and fault reports can be read without a backtrace.

use thiserror::Error;

/// Message bus error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection error: {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Stream provisioning failed: {stream}: {message}")]
    StreamProvisioning { stream: String, message: String },

    #[error("Subscription failed for consumer {consumer}: {message}")]
    Subscribe { consumer: String, message: String },

    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Acknowledgement failed: {operation}: {message}")]
    Acknowledgement { operation: String, message: String },

    #[error("Publish failed on subject {subject}: {message}")]
    Publish { subject: String, message: String },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Message decode error: {message}")]
    Decode { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a stream provisioning error
    pub fn stream_provisioning(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StreamProvisioning {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a subscription error
    pub fn subscribe(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            consumer: consumer.into(),
            message: message.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Create an acknowledgement error
    pub fn acknowledgement(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acknowledgement {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Errors that only affect a single message and never the session
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Serialization { .. })
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
