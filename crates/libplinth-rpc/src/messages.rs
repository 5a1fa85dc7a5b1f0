//! RPC request and response message types
//!
//! These types define the wire format for plugin calls: one JSON document
//! per line, requests addressing a `Service.Method` name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RpcError;

/// RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for correlation
    pub id: String,
    /// `Service.Method` name to invoke
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Create a new request with an auto-generated ID
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Result<Self, RpcError> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params: serde_json::to_value(params).map_err(|e| RpcError::Encode(e.to_string()))?,
        })
    }
}

/// RPC response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: String,
    /// Result value on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error details on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// Create a successful response
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, converting an error payload into [`RpcError::Remote`]
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Error payload in responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code (see [`codes`])
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Unknown method: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }
}

/// Error codes carried in [`ErrorPayload::code`]
pub mod codes {
    pub const PARSE_ERROR: &str = "parse_error";
    pub const METHOD_NOT_FOUND: &str = "method_not_found";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNSUPPORTED: &str = "unsupported";
    pub const INTERNAL: &str = "internal";
}
