//! Error types for the JSON-RPC core.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.

use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the crate.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

/// JSON-RPC 2.0 protocol errors.
///
/// These are always recovered inside the serve loop and answered with an
/// error response; they never terminate it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("parse error")]
    ParseError,

    #[error("invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    /// Handler failure; the handler's message is forwarded verbatim.
    #[error("{0}")]
    InternalError(Cow<'static, str>),
}

impl ProtocolError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Returns the JSON-RPC 2.0 error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => Self::PARSE_ERROR,
            Self::InvalidRequest(_) => Self::INVALID_REQUEST,
            Self::MethodNotFound(_) => Self::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => Self::INVALID_PARAMS,
            Self::InternalError(_) => Self::INTERNAL_ERROR,
        }
    }
}

/// Line transport failures. Fatal to whichever loop observes them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors seen by callers of the client correlation engine.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client not initialized: call initialize first")]
    NotInitialized,

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },
}

/// Failure reported by a handler implementation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub data: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for ClientError.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result type alias for TransportError.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for HandlerError.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::ParseError.code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest("test".into()).code(), -32600);
        assert_eq!(ProtocolError::MethodNotFound("test".into()).code(), -32601);
        assert_eq!(ProtocolError::InvalidParams("test".into()).code(), -32602);
        assert_eq!(ProtocolError::InternalError("test".into()).code(), -32603);
    }

    #[test]
    fn test_method_not_found_message() {
        let err = ProtocolError::MethodNotFound("unknown/thing".into());
        assert_eq!(err.to_string(), "method not found: unknown/thing");
    }

    #[test]
    fn test_internal_error_forwards_message() {
        let err = ProtocolError::InternalError("disk on fire".into());
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_error_conversion() {
        let io = || std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");

        let err: McpError = TransportError::from(io()).into();
        assert!(matches!(err, McpError::Transport(TransportError::Io(_))));

        let err: ClientError = TransportError::from(io()).into();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
