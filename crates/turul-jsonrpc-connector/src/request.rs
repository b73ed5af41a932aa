use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC request. Without an `id` it is a notification: fire-and-forget,
/// never answered.
///
/// `P` is the shape params are decoded into. Inbound messages arrive as
/// `JsonRpcRequest<Value>` and are converted with [`JsonRpcRequest::into_typed`]
/// before reaching a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest<P = Value> {
    #[serde(rename = "jsonrpc", default)]
    pub version: JsonRpcVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcRequest<P> {
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request that expects a response
    pub fn call(id: impl Into<RequestId>, method: impl Into<String>, params: Option<P>) -> Self {
        Self::new(Some(id.into()), method, params)
    }

    /// Create a notification (no id, no response)
    pub fn notification(method: impl Into<String>, params: Option<P>) -> Self {
        Self::new(None, method, params)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Replace the params while keeping method and id
    pub fn map_params<Q>(self, f: impl FnOnce(P) -> Q) -> JsonRpcRequest<Q> {
        JsonRpcRequest {
            version: self.version,
            id: self.id,
            method: self.method,
            params: self.params.map(f),
        }
    }
}

impl JsonRpcRequest<Value> {
    /// Decode params into the shape `P`. Absent params stay absent; present
    /// params must be structurally compatible with `P`.
    pub fn into_typed<P: DeserializeOwned>(self) -> Result<JsonRpcRequest<P>, serde_json::Error> {
        let params = self.params.map(serde_json::from_value::<P>).transpose()?;
        Ok(JsonRpcRequest {
            version: self.version,
            id: self.id,
            method: self.method,
            params,
        })
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.as_object()?.get(name)
    }

    /// Get a parameter by index (if params are an array)
    pub fn get_param_index(&self, index: usize) -> Option<&Value> {
        self.params.as_ref()?.as_array()?.get(index)
    }
}
