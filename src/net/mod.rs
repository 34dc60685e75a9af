//! Operator transport.
//!
//! The session engine never blocks, so the transport is poll-based: connection
//! setup, sends and receives all return immediately and the engine asks again
//! on its next tick. Replies are queued per peer address.
//!
//! On the wire every message is one line of JSON:
//!
//! ```text
//! {"tag":"GET Zeroes","address":"<hex-dash>","payload":"<hex>"}
//! ```
//!
//! Requests carry the destination address; replies carry the address of the
//! peer that sent them.

#[cfg(test)]
mod memory;
mod resolver;
mod tcp;

#[cfg(test)]
pub use memory::{MemoryHandle, MemoryTransport, Responder, SentFrame};
pub use resolver::{FileResolver, NameResolver, ResolveError};
#[cfg(test)]
pub use resolver::StaticResolver;
pub use tcp::TcpTransport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::task::Poll;

use crate::types::Address;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Request tags understood by the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTag {
    /// Certificate handshake
    #[serde(rename = "SET Certificate")]
    Certificate,
    /// Current difficulty target
    #[serde(rename = "GET Zeroes")]
    Zeroes,
    /// Fractional validation target `(k, N)`
    #[serde(rename = "GET Validation")]
    Validation,
    /// Register a freshly mined unit
    #[serde(rename = "SET Prototype")]
    Prototype,
    /// Release ownership of a unit
    #[serde(rename = "SET CurrentReleaseOwnerless")]
    ReleaseOwnerless,
    /// Current owner hands a unit to a new owner
    #[serde(rename = "SET CurrentOwnerClaim")]
    CurrentOwnerClaim,
    /// New owner claims a transferred unit
    #[serde(rename = "SET NewOwnerClaim")]
    NewOwnerClaim,
}

impl RequestTag {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "SET Certificate",
            Self::Zeroes => "GET Zeroes",
            Self::Validation => "GET Validation",
            Self::Prototype => "SET Prototype",
            Self::ReleaseOwnerless => "SET CurrentReleaseOwnerless",
            Self::CurrentOwnerClaim => "SET CurrentOwnerClaim",
            Self::NewOwnerClaim => "SET NewOwnerClaim",
        }
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network location of an operator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One line on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Request tag
    pub tag: RequestTag,
    /// Destination (requests) or origin (replies)
    pub address: Address,
    /// Hex payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl WireFrame {
    /// Build a frame, hex-encoding the payload
    #[must_use]
    pub fn new(tag: RequestTag, address: Address, payload: Option<&[u8]>) -> Self {
        Self {
            tag,
            address,
            payload: payload.map(hex::encode),
        }
    }

    /// Encode as one newline-terminated JSON line
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_line(&self) -> TransportResult<Vec<u8>> {
        let mut line = serde_json::to_vec(self).map_err(|e| TransportError::Frame(e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line (without the terminator)
    ///
    /// # Errors
    /// Returns error if the line is not a valid frame
    pub fn from_line(line: &[u8]) -> TransportResult<Self> {
        serde_json::from_slice(line).map_err(|e| TransportError::Frame(e.to_string()))
    }

    /// Decoded payload bytes; an absent payload is empty
    ///
    /// # Errors
    /// Returns error if the payload is not hex
    pub fn payload_bytes(&self) -> TransportResult<Vec<u8>> {
        match &self.payload {
            Some(hex_payload) => {
                hex::decode(hex_payload).map_err(|e| TransportError::Frame(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Non-blocking, address-keyed transport to an operator.
pub trait Transport {
    /// Begin connecting; completion is observed through `poll_connected`
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()>;

    /// Whether the connection attempt has finished
    fn poll_connected(&mut self) -> Poll<TransportResult<()>>;

    /// Queue a request for `address`
    fn send(
        &mut self,
        tag: RequestTag,
        address: &Address,
        payload: Option<&[u8]>,
    ) -> TransportResult<()>;

    /// Take the next reply from `address`, if one has arrived
    fn poll_received(&mut self, address: &Address) -> TransportResult<Option<Vec<u8>>>;

    /// Drop the connection; idempotent
    fn close(&mut self);
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,
    /// Connection could not be established
    #[error("connection to {endpoint} failed: {reason}")]
    Connect {
        /// Target endpoint
        endpoint: String,
        /// Underlying cause
        reason: String,
    },
    /// Socket error after connecting
    #[error("IO error: {0}")]
    Io(String),
    /// Peer closed the connection
    #[error("connection closed by peer")]
    Closed,
    /// No async runtime to drive connection setup
    #[error("no async runtime available")]
    NoRuntime,
    /// Undecodable frame
    #[error("invalid frame: {0}")]
    Frame(String),
}
