//! JSON-RPC 2.0 reserved error codes.
//!
//! The `-32000..-32099` range is reserved for implementation-defined server
//! errors; this crate does not currently mint any of its own, but carriers
//! are free to surface codes in that range from whatever they wrap.

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub const JSONRPC_VERSION: &str = "2.0";
