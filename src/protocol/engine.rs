//! Building, parsing, and dispatching JSON-RPC 2.0 envelopes.
//!
//! This is the one place the wire format is assembled and taken apart; every
//! carrier (in-process call, HTTP, XMPP) routes through these functions so
//! the validation rules only exist once.

use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::MethodRegistry;
use crate::error::{JezebelError, Result};
use crate::protocol::codes;
use crate::protocol::types::{Params, RawRequest, RawResponse, RpcErrorObject};

/// Builds a request envelope. At most one of `args`/`kwargs` may be
/// non-empty — mixing positional and named parameters in one call is
/// rejected, matching the wire format (`params` is an array or an object,
/// never both at once).
pub fn build_request(
    method: &str,
    args: Vec<Value>,
    kwargs: serde_json::Map<String, Value>,
) -> Result<RawRequest> {
    if !args.is_empty() && !kwargs.is_empty() {
        return Err(JezebelError::InvalidParams(
            "cannot mix positional and named parameters".to_string(),
        ));
    }

    let params = if !args.is_empty() {
        Some(Value::Array(args))
    } else if !kwargs.is_empty() {
        Some(Value::Object(kwargs))
    } else {
        None
    };

    Ok(RawRequest {
        jsonrpc: codes::JSONRPC_VERSION.to_string(),
        id: Some(Value::String(Uuid::new_v4().to_string())),
        method: method.to_string(),
        params,
    })
}

/// Builds a notification — a request with no `id`, for which no reply is
/// expected or sent.
pub fn build_notification(
    method: &str,
    args: Vec<Value>,
    kwargs: serde_json::Map<String, Value>,
) -> Result<RawRequest> {
    let mut request = build_request(method, args, kwargs)?;
    request.id = None;
    Ok(request)
}

fn is_valid_id(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Null)
}

/// Parses and validates a request envelope from raw bytes. Returns the
/// specific `JezebelError` variant that corresponds to the violated rule so
/// callers can turn it directly into the matching JSON-RPC error code.
pub fn parse_request(raw: &[u8]) -> Result<RawRequest> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| JezebelError::ParseError(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| JezebelError::InvalidRequest("request must be a JSON object".to_string()))?;

    if let Some(id) = obj.get("id") {
        if !is_valid_id(id) {
            return Err(JezebelError::InvalidRequest(
                "id must be a string, number, or null".to_string(),
            ));
        }
    }

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == codes::JSONRPC_VERSION => {}
        _ => {
            return Err(JezebelError::InvalidRequest(
                "jsonrpc must be \"2.0\"".to_string(),
            ))
        }
    }

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => return Err(JezebelError::InvalidRequest("method must be a string".to_string())),
    };

    if let Some(params) = obj.get("params") {
        if !params.is_array() && !params.is_object() {
            return Err(JezebelError::InvalidRequest(
                "params must be an array or object".to_string(),
            ));
        }
    }

    serde_json::from_value(value).map_err(|e| JezebelError::InvalidRequest(e.to_string()))
}

/// Parses and validates a response envelope. Deliberately does **not**
/// require `id == null` on error responses — that rule does not hold in
/// general: an error can legitimately be correlated to a request whose id
/// was successfully parsed.
pub fn parse_response(raw: &[u8]) -> Result<RawResponse> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| JezebelError::MalformedResponse(e.to_string()))?;

    let obj = value.as_object().ok_or_else(|| {
        JezebelError::MalformedResponse("response must be a JSON object".to_string())
    })?;

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == codes::JSONRPC_VERSION => {}
        _ => {
            return Err(JezebelError::MalformedResponse(
                "jsonrpc must be \"2.0\"".to_string(),
            ))
        }
    }

    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    if has_result == has_error {
        return Err(JezebelError::MalformedResponse(
            "response must contain exactly one of result or error".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| JezebelError::MalformedResponse(e.to_string()))
}

/// Builds an error response. Copies `id` from the original request when it
/// was present and of a valid type, otherwise uses `null` — this is the one
/// case where the id of the reply does not match the id of the request it
/// answers.
pub fn build_error(orig_req: Option<&Value>, code: i64, message: impl Into<String>) -> RawResponse {
    let id = orig_req
        .and_then(|req| req.as_object())
        .and_then(|obj| obj.get("id"))
        .filter(|id| is_valid_id(id))
        .cloned()
        .unwrap_or(Value::Null);

    RawResponse {
        jsonrpc: codes::JSONRPC_VERSION.to_string(),
        id,
        result: None,
        error: Some(RpcErrorObject {
            code,
            message: message.into(),
            data: None,
        }),
    }
}

fn build_result(id: Value, result: Value) -> RawResponse {
    RawResponse {
        jsonrpc: codes::JSONRPC_VERSION.to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

/// Maps an inbound JSON-RPC error `(code, message)` to the caller-visible
/// error kind. Reserved codes get a specific variant; anything else becomes
/// a generic `RemoteError` carrying the code through unchanged.
pub fn translate_rpc_error(code: i64, message: &str) -> JezebelError {
    match code {
        codes::PARSE_ERROR | codes::INVALID_REQUEST => {
            JezebelError::InvalidRequest(message.to_string())
        }
        codes::METHOD_NOT_FOUND => JezebelError::MethodNotFound(message.to_string()),
        codes::INVALID_PARAMS => JezebelError::InvalidParams(message.to_string()),
        codes::INTERNAL_ERROR => JezebelError::RemoteInternalError(message.to_string()),
        other => JezebelError::RemoteError {
            code: other,
            message: message.to_string(),
        },
    }
}

/// Parses, dispatches, and (for requests) builds the reply for one inbound
/// message. Returns `None` for a well-formed notification — there is
/// nothing to send back. A malformed message always gets a reply, even if
/// it looked like it might have been a notification, because a missing
/// `id` can't be distinguished from a parse failure that ate the `id`
/// field along with everything else.
pub async fn execute_request(registry: &MethodRegistry, raw: &[u8]) -> Option<RawResponse> {
    let parsed_value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => return Some(build_error(None, codes::PARSE_ERROR, e.to_string())),
    };

    let request = match parse_request(raw) {
        Ok(req) => req,
        Err(e) => {
            let code = match e {
                JezebelError::ParseError(_) => codes::PARSE_ERROR,
                _ => codes::INVALID_REQUEST,
            };
            return Some(build_error(Some(&parsed_value), code, e.to_string()));
        }
    };

    let is_notification = request.id.is_none();

    let params = match Params::from_value(request.params.clone()) {
        Some(p) => p,
        None => {
            let resp = build_error(
                Some(&parsed_value),
                codes::INVALID_PARAMS,
                "params must be an array or object",
            );
            return if is_notification { None } else { Some(resp) };
        }
    };

    let result = registry.call(&request.method, params).await;

    match (is_notification, result) {
        (true, Ok(_)) => None,
        (true, Err(_)) => None,
        (false, Ok(value)) => Some(build_result(request.id.unwrap_or(Value::Null), value)),
        (false, Err(e)) => {
            let code = match &e {
                JezebelError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
                JezebelError::InvalidParams(_) => codes::INVALID_PARAMS,
                _ => codes::INTERNAL_ERROR,
            };
            Some(build_error(Some(&parsed_value), code, e.to_string()))
        }
    }
}
