//! # Message Structures for the Scan Queues
//!
//! Wire formats for inbound scan requests and outbound scan results.

use super::errors::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};

/// Unit of work decoded from an inbound envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Target host address
    pub ip: String,
    /// Ports to scan, in request order
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Scan this request belongs to
    pub scan_id: String,
    /// Identifier of the originating request
    pub request_id: String,
}

impl ScanRequest {
    /// Decode a request from raw envelope data
    pub fn decode(data: &[u8]) -> MessagingResult<Self> {
        serde_json::from_slice(data).map_err(|e| MessagingError::decode(e.to_string()))
    }

    /// Requests without ports are dropped by the workers
    pub fn has_ports(&self) -> bool {
        !self.ports.is_empty()
    }
}

/// Result published once per completed scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Opaque scan-engine output
    #[serde(rename = "nmap_result")]
    pub result: serde_json::Value,
    pub ip: String,
    pub scan_id: String,
    pub request_id: String,
}

impl ScanResult {
    /// Wrap executor output, carrying the identity of the originating request
    pub fn for_request(request: &ScanRequest, result: serde_json::Value) -> Self {
        Self {
            result,
            ip: request.ip.clone(),
            scan_id: request.scan_id.clone(),
            request_id: request.request_id.clone(),
        }
    }

    /// Serialize for publishing
    pub fn to_payload(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }
}
