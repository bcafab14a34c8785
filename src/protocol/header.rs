//! Per-message header.
//!
//! Every body on the wire, in either direction, is preceded by exactly one
//! header encoded with the negotiated codec:
//!
//! ```text
//! ┌───────────────┬──────┬────────┐
//! │ ServiceMethod │ Seq  │ Error  │
//! │ "Foo.Sum"     │ u64  │ string │
//! └───────────────┴──────┴────────┘
//! ```
//!
//! Requests and responses are matched by `Seq` alone. An empty `Error`
//! means success.

use serde::{Deserialize, Serialize};

/// Decoded message header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// `"Service.Method"`; echoed back on the response.
    pub service_method: String,
    /// Client-assigned sequence number of the call.
    pub seq: u64,
    /// Error message, empty on success.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Create a request header.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// The same header with an error attached (response side).
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Whether this header reports an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
