//! Jezebel: a peer-to-peer JSON-RPC 2.0 agent framework.
//!
//! An `Agent` is composed from an ordered list of `Capability` objects
//! (see [`agent`]); each contributes rpc-exposed methods to a shared
//! [`dispatch::MethodRegistry`] and, optionally, an outbound/inbound
//! [`carrier`] (HTTP, XMPP) keyed by URL scheme. [`call::call`] issues a
//! method call either to another in-process agent or to a URL, returning a
//! [`call::Handle`] that resolves once the call completes.

pub mod agent;
pub mod call;
pub mod carrier;
pub mod dispatch;
pub mod error;
pub mod protocol;

pub use agent::{Agent, AgentBuilder, AgentConfig, Capability, CompositionGuard};
pub use call::{call, CallTarget, Handle};
pub use carrier::{Carrier, CarrierRegistry, HttpCapability, XmppCapability};
pub use dispatch::MethodRegistry;
pub use error::{JezebelError, Result};
