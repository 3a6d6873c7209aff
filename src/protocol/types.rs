//! JSON-RPC 2.0 envelope types and codec.
//!
//! Only the envelope shape is decoded here. `params`, `result` and `error.data`
//! bodies stay as raw JSON until the method-specific layer resolves them.

use crate::error::ProtocolError;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names prefixed with this are dispatched as notifications.
pub const NOTIFICATION_PREFIX: &str = "notifications/";

/// Deferred JSON body.
pub type RawJson = Box<RawValue>;

/// JSON-RPC request ID - integer, string, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Null => f.write_str("null"),
        }
    }
}

/// JSON-RPC 2.0 Request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RawJson>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: RawJson) -> Self {
        self.params = Some(params);
        self
    }
}

/// JSON-RPC 2.0 Notification. Never answered.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RawJson>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: RawJson) -> Self {
        self.params = Some(params);
        self
    }
}

/// Success payload or error object of a response. Mutually exclusive.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Result(RawJson),
    Error(JsonRpcError),
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: RawJson) -> Self {
        Self {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn result(&self) -> Option<&RawValue> {
        match &self.payload {
            ResponsePayload::Result(raw) => Some(raw),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(error),
            ResponsePayload::Result(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

impl Serialize for JsonRpcResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            jsonrpc: &'static str,
            id: &'a RequestId,
            #[serde(skip_serializing_if = "Option::is_none")]
            result: Option<&'a RawValue>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a JsonRpcError>,
        }

        Wire {
            jsonrpc: JSONRPC_VERSION,
            id: &self.id,
            result: self.result(),
            error: self.error_object(),
        }
        .serialize(serializer)
    }
}

/// JSON-RPC 2.0 Error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&ProtocolError> for JsonRpcError {
    fn from(err: &ProtocolError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ProtocolError> for JsonRpcError {
    fn from(err: ProtocolError) -> Self {
        Self::from(&err)
    }
}

/// Any message that can travel over the wire.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Envelope {
    /// Serialize to a single line of compact JSON, without the terminator.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::Request(request) => serde_json::to_vec(request),
            Self::Notification(notification) => serde_json::to_vec(notification),
            Self::Response(response) => serde_json::to_vec(response),
        }
    }

    /// Decode one line into an envelope.
    ///
    /// Only the generic shape is checked. A `jsonrpc` other than `"2.0"` is
    /// rejected as an invalid request, carrying the id when one was readable.
    pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = match serde_json::from_slice(line) {
            Ok(raw) => raw,
            Err(e) => {
                // Valid JSON with the wrong shape is an invalid request.
                return Err(if serde_json::from_slice::<IgnoredAny>(line).is_ok() {
                    DecodeError::invalid(None, "envelope must be a JSON object")
                } else {
                    DecodeError::Parse(e.to_string())
                });
            }
        };
        raw.classify()
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Envelope {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for Envelope {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for Envelope {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

/// Envelope decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not JSON at all.
    #[error("parse error: {0}")]
    Parse(String),
    /// JSON, but not a valid JSON-RPC 2.0 envelope.
    #[error("invalid request: {reason}")]
    Invalid {
        id: Option<RequestId>,
        reason: Cow<'static, str>,
    },
}

impl DecodeError {
    fn invalid(id: Option<RequestId>, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Invalid {
            id,
            reason: reason.into(),
        }
    }

    /// The id to answer with; `null` when none was recoverable.
    pub fn response_id(&self) -> RequestId {
        match self {
            Self::Invalid { id: Some(id), .. } => id.clone(),
            _ => RequestId::Null,
        }
    }

    pub fn to_protocol_error(&self) -> ProtocolError {
        match self {
            Self::Parse(_) => ProtocolError::ParseError,
            Self::Invalid { reason, .. } => ProtocolError::InvalidRequest(reason.clone()),
        }
    }

    /// Error response to send back for this failure.
    pub fn to_response(&self) -> JsonRpcResponse {
        JsonRpcResponse::error(self.response_id(), self.to_protocol_error().into())
    }
}

/// Field-level view of an incoming line. Every member is kept raw so that a
/// malformed one surfaces as an invalid request instead of a parse error.
/// An explicit `null` is `Some("null")`, distinct from an absent member.
struct RawEnvelope {
    jsonrpc: Option<RawJson>,
    id: Option<RawJson>,
    method: Option<RawJson>,
    params: Option<RawJson>,
    result: Option<RawJson>,
    error: Option<RawJson>,
}

impl<'de> Deserialize<'de> for RawEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Map form only; a derived impl would also accept positional arrays.
        let mut members = HashMap::<String, RawJson>::deserialize(deserializer)?;
        Ok(Self {
            jsonrpc: members.remove("jsonrpc"),
            id: members.remove("id"),
            method: members.remove("method"),
            params: members.remove("params"),
            result: members.remove("result"),
            error: members.remove("error"),
        })
    }
}

impl RawEnvelope {
    fn classify(self) -> Result<Envelope, DecodeError> {
        let id = match &self.id {
            Some(raw) => match serde_json::from_str::<RequestId>(raw.get()) {
                Ok(id) => Some(id),
                Err(_) => return Err(DecodeError::invalid(None, "id must be an integer or string")),
            },
            None => None,
        };

        match self
            .jsonrpc
            .as_ref()
            .map(|raw| serde_json::from_str::<String>(raw.get()))
        {
            Some(Ok(version)) if version == JSONRPC_VERSION => {}
            Some(_) => return Err(DecodeError::invalid(id, "jsonrpc must be \"2.0\"")),
            None => return Err(DecodeError::invalid(id, "missing jsonrpc member")),
        }

        if let Some(raw_method) = self.method {
            let Ok(method) = serde_json::from_str::<String>(raw_method.get()) else {
                return Err(DecodeError::invalid(id, "method must be a string"));
            };
            return Ok(match id {
                Some(id) => Envelope::Request(JsonRpcRequest {
                    jsonrpc: JSONRPC_VERSION.into(),
                    id,
                    method,
                    params: self.params,
                }),
                None => Envelope::Notification(JsonRpcNotification {
                    jsonrpc: JSONRPC_VERSION.into(),
                    method,
                    params: self.params,
                }),
            });
        }

        let Some(id) = id else {
            return Err(DecodeError::invalid(None, "missing method"));
        };

        let payload = match (self.result, self.error) {
            (Some(result), None) => ResponsePayload::Result(result),
            (None, Some(error)) => match serde_json::from_str::<JsonRpcError>(error.get()) {
                Ok(error) => ResponsePayload::Error(error),
                Err(_) => return Err(DecodeError::invalid(Some(id), "malformed error object")),
            },
            (Some(_), Some(_)) => {
                return Err(DecodeError::invalid(
                    Some(id),
                    "response carries both result and error",
                ));
            }
            (None, None) => {
                return Err(DecodeError::invalid(
                    Some(id),
                    "response carries neither result nor error",
                ));
            }
        };

        Ok(Envelope::Response(JsonRpcResponse { id, payload }))
    }
}

/// Serialize a value into a deferred raw body.
pub fn to_raw<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<RawJson> {
    serde_json::value::to_raw_value(value)
}
