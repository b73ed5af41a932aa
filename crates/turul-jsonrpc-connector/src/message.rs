//! Classification of inbound messages.
//!
//! Anything carrying a `method` is a request (or notification); anything
//! carrying `result`/`error` is a response. Everything else is rejected here
//! and never reaches dispatch.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ConnectorResult, JsonRpcConnectorError};
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;
use crate::types::RequestId;

/// A decoded inbound or outbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Decode raw message text
    pub fn parse(text: &str) -> ConnectorResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| JsonRpcConnectorError::MalformedMessage {
                id: None,
                reason: format!("invalid JSON: {}", e),
                parse_failure: true,
            })?;
        Self::from_value(value)
    }

    /// Classify and decode an already parsed JSON value
    pub fn from_value(value: Value) -> ConnectorResult<Self> {
        let Some(obj) = value.as_object() else {
            return Err(JsonRpcConnectorError::malformed(
                None,
                "message is not a JSON object",
            ));
        };

        let id = obj.get("id").and_then(RequestId::from_value);

        if let Some(version) = obj.get("jsonrpc") {
            if version != crate::JSONRPC_VERSION {
                return Err(JsonRpcConnectorError::malformed(
                    id,
                    format!("unsupported JSON-RPC version {}", version),
                ));
            }
        }

        if let Some(method) = obj.get("method") {
            match method.as_str() {
                Some(m) if !m.is_empty() => {}
                _ => {
                    return Err(JsonRpcConnectorError::malformed(
                        id,
                        "'method' must be a non-empty string",
                    ));
                }
            }
            return serde_json::from_value::<JsonRpcRequest>(value)
                .map(JsonRpcMessage::Request)
                .map_err(|e| JsonRpcConnectorError::malformed(id, e.to_string()));
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            return serde_json::from_value::<JsonRpcResponse>(value)
                .map(JsonRpcMessage::Response)
                .map_err(|e| JsonRpcConnectorError::malformed(id, e.to_string()));
        }

        Err(JsonRpcConnectorError::malformed(
            id,
            "message has neither 'method' nor 'result'/'error'",
        ))
    }

    /// Encode for handing to a transport
    pub fn to_json_string(&self) -> ConnectorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(request) => request.id.as_ref(),
            JsonRpcMessage::Response(response) => response.id.as_ref(),
        }
    }

    /// Method name, for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.method),
            JsonRpcMessage::Response(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_))
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

/// Parse a JSON string into a JSON-RPC message
pub fn parse_message(text: &str) -> ConnectorResult<JsonRpcMessage> {
    JsonRpcMessage::parse(text)
}
