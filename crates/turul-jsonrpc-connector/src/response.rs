use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::JsonRpcErrorObject;
use crate::types::{JsonRpcVersion, RequestId};

/// Outcome carried by a response. Result and error are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Success; `Value::Null` is the empty result
    Result(Value),
    Error(JsonRpcErrorObject),
}

/// A JSON-RPC response
///
/// `id` echoes the originating request. It is `None` (serialized as `null`)
/// only for errors answering a message whose id could not be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct JsonRpcResponse {
    pub version: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn new(id: Option<RequestId>, payload: ResponsePayload) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            payload,
        }
    }

    pub fn success(id: RequestId, result: Value) -> Self {
        Self::new(Some(id), ResponsePayload::Result(result))
    }

    /// Success with a `null` result, for handlers that only perform side effects
    pub fn empty(id: RequestId) -> Self {
        Self::success(id, Value::Null)
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self::new(id, ResponsePayload::Error(error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(value) => Some(value),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&JsonRpcErrorObject> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(error),
            ResponsePayload::Result(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, JsonRpcErrorObject> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// Wire form, where result/error exclusivity is checked on the way in
#[derive(Serialize, Deserialize)]
struct WireResponse {
    #[serde(rename = "jsonrpc", default)]
    version: JsonRpcVersion,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcErrorObject>,
}

/// A present `result` member is `Some`, even when it is `null`
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireResponse> for JsonRpcResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let payload = match (wire.result, wire.error) {
            (Some(result), None) => ResponsePayload::Result(result),
            (None, Some(error)) => ResponsePayload::Error(error),
            (Some(_), Some(_)) => {
                return Err("response carries both 'result' and 'error'".to_string());
            }
            (None, None) => {
                return Err("response carries neither 'result' nor 'error'".to_string());
            }
        };

        Ok(Self {
            version: wire.version,
            id: wire.id,
            payload,
        })
    }
}

impl From<JsonRpcResponse> for WireResponse {
    fn from(response: JsonRpcResponse) -> Self {
        let (result, error) = match response.payload {
            ResponsePayload::Result(value) => (Some(value), None),
            ResponsePayload::Error(error) => (None, Some(error)),
        };

        Self {
            version: response.version,
            id: response.id,
            result,
            error,
        }
    }
}
