use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

use crate::error_codes;
use crate::types::RequestId;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// The `error` member of a response: code, human readable message and
/// optional diagnostic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn parse_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, message, None)
    }

    pub fn invalid_request(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            Some(format!("Method '{}' not found", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, message, None)
    }

    /// Implementation-defined error. Codes outside -32099..=-32000 are kept
    /// as given but flagged in debug builds.
    pub fn server_error(code: i64, message: &str, data: Option<Value>) -> Self {
        debug_assert!(
            (error_codes::SERVER_ERROR_START..=error_codes::SERVER_ERROR_END).contains(&code),
            "Server error code must be in range -32099 to -32000"
        );
        Self::new(
            JsonRpcErrorCode::ServerError(code),
            Some(message.to_string()),
            data,
        )
    }

    /// Build an internal error from any failure. The message is the failure's
    /// display text and `data.trace` holds the display text of every error in
    /// its source chain, outermost first.
    pub fn from_failure(failure: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(failure);
        while let Some(err) = current {
            trace.push(Value::String(err.to_string()));
            current = err.source();
        }

        Self::new(
            JsonRpcErrorCode::InternalError,
            Some(failure.to_string()),
            Some(json!({ "trace": trace })),
        )
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorObject {}

/// Send-time failures reported by a transport or response sink
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("No transport is bound to the session")]
    NotConnected,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every failure condition the connector distinguishes
#[derive(Debug, Error)]
pub enum JsonRpcConnectorError {
    /// Undecodable message or one missing a required field
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        id: Option<RequestId>,
        reason: String,
        /// The text was not JSON at all
        parse_failure: bool,
    },

    #[error("Params of '{method}' cannot be converted to {expected}: {reason}")]
    ParamShapeMismatch {
        method: String,
        expected: &'static str,
        reason: String,
    },

    /// Failure raised inside handler logic, already mapped to an error object
    #[error("Handler failure: {0}")]
    HandlerFailure(JsonRpcErrorObject),

    #[error("Request id {0} is already registered")]
    DuplicateId(RequestId),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The peer answered with an error response
    #[error("Remote error {}: {}", .0.code, .0.message)]
    RemoteError(JsonRpcErrorObject),

    #[error("Transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("Result of request {id} cannot be converted to {expected}: {reason}")]
    ResultShapeMismatch {
        id: RequestId,
        expected: &'static str,
        reason: String,
    },

    #[error("Session id already assigned ({current}), cannot change it to {requested}")]
    SessionIdAlreadyAssigned { current: String, requested: String },

    #[error("Session id '{0}' is used by another live session")]
    SessionIdConflict(String),

    #[error("Session has no assigned id")]
    SessionIdUnassigned,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type used across the connector
pub type ConnectorResult<T> = Result<T, JsonRpcConnectorError>;

impl JsonRpcConnectorError {
    pub fn malformed(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            id,
            reason: reason.into(),
            parse_failure: false,
        }
    }

    /// Id of the message the failure refers to, when one is known
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::MalformedMessage { id, .. } => id.as_ref(),
            Self::DuplicateId(id) | Self::ResultShapeMismatch { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    pub fn is_remote_error(&self) -> bool {
        matches!(self, Self::RemoteError(_))
    }

    /// The error payload returned by the peer, if this is a remote error
    pub fn remote_error(&self) -> Option<&JsonRpcErrorObject> {
        match self {
            Self::RemoteError(error) => Some(error),
            _ => None,
        }
    }
}

/// Trait for errors that can be converted to JSON-RPC error objects
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    /// Convert this error to a JSON-RPC error object
    fn to_error_object(&self) -> JsonRpcErrorObject;
}

impl ToJsonRpcError for JsonRpcConnectorError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            Self::MalformedMessage {
                reason,
                parse_failure: true,
                ..
            } => JsonRpcErrorObject::parse_error(Some(reason.clone())),
            Self::MalformedMessage { reason, .. } => {
                JsonRpcErrorObject::invalid_request(Some(reason.clone()))
            }
            Self::ParamShapeMismatch { .. } => {
                JsonRpcErrorObject::invalid_params(&self.to_string())
            }
            Self::HandlerFailure(error) | Self::RemoteError(error) => error.clone(),
            Self::ConnectionLost(reason) => JsonRpcErrorObject::server_error(
                error_codes::CONNECTION_LOST,
                &format!("Connection lost: {}", reason),
                None,
            ),
            other => JsonRpcErrorObject::from_failure(other),
        }
    }
}

/// Ready-made error type for handlers that do not define their own
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Respond with exactly this error object
    #[error("{0}")]
    Rpc(JsonRpcErrorObject),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn internal(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Internal(error.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(error)
    }
}

impl From<JsonRpcConnectorError> for HandlerError {
    fn from(error: JsonRpcConnectorError) -> Self {
        Self::Rpc(error.to_error_object())
    }
}

impl ToJsonRpcError for HandlerError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            HandlerError::MethodNotFound(method) => JsonRpcErrorObject::method_not_found(method),
            HandlerError::InvalidParams(message) => JsonRpcErrorObject::invalid_params(message),
            HandlerError::Rpc(error) => error.clone(),
            HandlerError::Message(message) => {
                JsonRpcErrorObject::internal_error(Some(message.clone()))
            }
            HandlerError::Internal(error) => JsonRpcErrorObject::from_failure(error.as_ref()),
        }
    }
}
