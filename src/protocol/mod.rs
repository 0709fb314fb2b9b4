//! JSON-RPC 2.0 envelope types and the engine that builds, parses, and
//! dispatches them. Nothing in this module is carrier-specific.

pub mod codes;
pub mod engine;
pub mod types;

pub use engine::{
    build_error, build_notification, build_request, execute_request, parse_request,
    parse_response, translate_rpc_error,
};
pub use types::{Params, RawRequest, RawResponse, RpcErrorObject};
