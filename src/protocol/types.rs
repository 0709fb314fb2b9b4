//! JSON-RPC 2.0 wire types.
//!
//! `id` is kept as a raw `serde_json::Value` rather than a typed `RequestId`
//! enum: the wire format allows string, number or null, and `parse_request`
//! below is responsible for rejecting anything else. Typing it narrower here
//! would just move that validation into serde's deserializer, where the
//! resulting error can't be turned into the right JSON-RPC error code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request or notification. `id` is `None` for notifications — the field
/// is omitted from the wire entirely, not sent as `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRequest {
    pub jsonrpc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A response. Exactly one of `result`/`error` is present; `id` is always
/// present, and is `null` only when the original request's id could not be
/// recovered (e.g. the request failed to parse at all).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawResponse {
    pub jsonrpc: String,

    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decoded method arguments. A method is called with either positional or
/// named arguments, never both — `params` on the wire is a JSON array or a
/// JSON object, never anything else.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Value>),
    Named(serde_json::Map<String, Value>),
    None,
}

impl Params {
    pub fn from_value(value: Option<Value>) -> Option<Self> {
        match value {
            None => Some(Params::None),
            Some(Value::Array(items)) => Some(Params::Positional(items)),
            Some(Value::Object(map)) => Some(Params::Named(map)),
            Some(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Params::None => None,
            Params::Positional(items) => Some(Value::Array(items)),
            Params::Named(map) => Some(Value::Object(map)),
        }
    }
}
