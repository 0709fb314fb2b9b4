// Centralized error handling using thiserror for type-safe error management
//
// One enum covers both the JSON-RPC protocol error kinds (the five codes a
// peer can see over the wire) and the local/transport failures that never
// cross the wire at all (connection refused, auth failure, call timeout,
// unknown URL scheme). Keeping them in one type means callers match on a
// single `JezebelError` regardless of which carrier produced it.

use thiserror::Error;

/// Errors produced anywhere in the call path: building/parsing JSON-RPC
/// envelopes, dispatching to a capability method, or talking to a carrier.
#[derive(Debug, Error)]
pub enum JezebelError {
    /// Inbound JSON could not be parsed as a JSON value at all (-32700).
    #[error("parse error: {0}")]
    ParseError(String),

    /// Inbound envelope was not a well-formed JSON-RPC 2.0 request (-32600).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No capability exposes a method with this name (-32601).
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// `params` was present but not a list or mapping, or didn't match the
    /// target method's signature (-32602).
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The target method raised while executing (-32603 on the wire).
    #[error("internal error: {0}")]
    InternalError(String),

    /// A JSON-RPC error came back with a code outside the reserved range.
    #[error("remote error {code}: {message}")]
    RemoteError { code: i64, message: String },

    /// A JSON-RPC error came back with one of the reserved codes mapped by
    /// `translate_rpc_error`, but the call site just wants to surface it.
    #[error("remote internal error: {0}")]
    RemoteInternalError(String),

    /// No capability in the composition registered a handler for this URL
    /// scheme.
    #[error("no carrier registered for scheme: {0}")]
    UnknownScheme(String),

    /// A carrier could not establish or maintain its connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// XMPP (or any carrier requiring auth) rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A call was sent but no response arrived within the configured
    /// timeout. The response, if it ever arrives, is dropped on receipt.
    #[error("call timed out")]
    Timeout,

    /// A carrier's session-establishment handshake did not reach a
    /// resolved state (open or auth-failed) before its configured timeout.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The peer sent both `result` and `error`, or neither, on a response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A capability builder or composition-time invariant was violated.
    #[error("composition error: {0}")]
    CompositionError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, JezebelError>;

impl From<anyhow::Error> for JezebelError {
    fn from(err: anyhow::Error) -> Self {
        JezebelError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JezebelError::MethodNotFound("echo".to_string());
        assert_eq!(err.to_string(), "method not found: echo");

        let err = JezebelError::RemoteError {
            code: -32099,
            message: "custom failure".to_string(),
        };
        assert_eq!(err.to_string(), "remote error -32099: custom failure");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: JezebelError = io_err.into();
        matches!(err, JezebelError::Io(_));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<i32> {
            Err(JezebelError::Timeout)
        }

        assert!(returns_error().is_err());
    }
}
