//! RPC error types

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Boxed error returned by cleanup tasks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Address string could not be parsed
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Dialing the endpoint failed
    #[error("Connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// Peer closed the connection before answering
    #[error("Connection to {0} closed before a response arrived")]
    ConnectionClosed(Endpoint),

    /// Call exceeded the caller-supplied deadline
    #[error("Call to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: Endpoint, timeout_ms: u64 },

    /// Request could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Response id did not match the request
    #[error("Response id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    /// Remote side answered with an error
    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    /// Binding the listener failed
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Accept loop failed outside of a deliberate shutdown
    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// A registered cleanup task failed
    #[error("Cleanup task '{name}' failed: {message}")]
    Cleanup { name: String, message: String },

    /// Server task vanished without reporting
    #[error("Server task ended without reporting a result")]
    Abandoned,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        RpcError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures of the transport itself, as opposed to encode,
    /// decode or remote errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Connect { .. }
                | RpcError::ConnectionClosed(_)
                | RpcError::Timeout { .. }
                | RpcError::Io(_)
        )
    }
}
