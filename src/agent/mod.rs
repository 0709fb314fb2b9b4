//! Capability composition: a structural stand-in for cooperative multiple
//! inheritance. A composed `Agent` is an ordered list of
//! `Capability` objects; their methods are merged into one dispatch table
//! (a later capability's method of the same name overrides an earlier
//! one's), their carrier URLs are concatenated in composition order, and
//! teardown walks the list in reverse.

pub mod config;

use async_trait::async_trait;

pub use config::AgentConfig;

use crate::carrier::CarrierRegistry;
use crate::dispatch::MethodRegistry;
use crate::error::Result;
use crate::protocol::RawResponse;

/// Proof that a capability is being initialized as part of an
/// `AgentBuilder` composition, not constructed and used standalone. Only
/// `AgentBuilder::build` can produce one, so a capability can't reach shared
/// composition state outside of a real build.
pub struct CompositionGuard(());

#[cfg(test)]
impl CompositionGuard {
    /// Test-only escape hatch for exercising a single capability's `init`
    /// without going through a full `AgentBuilder::build`.
    pub fn for_tests() -> Self {
        CompositionGuard(())
    }
}

/// One contribution to a composed agent: a set of rpc-exposed methods, an
/// optional carrier (with its own URL and scheme), and lifecycle hooks.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Consumes whatever configuration keys this capability recognizes and
    /// performs any setup that requires them (opening a socket, starting a
    /// listener). Capabilities run `init` in composition order, each seeing
    /// the config with the previous capabilities' keys already removed.
    async fn init(&mut self, guard: &CompositionGuard, config: &mut AgentConfig) -> Result<()>;

    /// Registers this capability's rpc-exposed methods into the shared
    /// dispatch table.
    fn register_methods(&self, registry: &mut MethodRegistry);

    /// Registers this capability's outbound carrier, if it has one, keyed
    /// by URL scheme (`"http"`, `"xmpp"`).
    fn register_carrier(&self, _carriers: &mut CarrierRegistry) {}

    /// Hands this capability a shared handle to the fully merged dispatch
    /// table, once composition is complete. A capability that listens for
    /// inbound calls (the HTTP server, the XMPP connection) uses this to
    /// route requests it receives into the whole composed agent's methods,
    /// not just its own. Capabilities with no inbound side leave this as a
    /// no-op.
    fn bind_dispatch(&self, _registry: std::sync::Arc<MethodRegistry>) {}

    /// URLs this capability can be reached at, in composition order. This is
    /// infallible by signature: a capability with nothing to report just
    /// returns an empty list, rather than needing to be wrapped for the
    /// failure of reporting its own state.
    fn urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Tears down this capability's resources. Must be idempotent — called
    /// once per `Agent::disconnect`, but a capability may also be torn down
    /// directly in tests.
    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct AgentBuilder {
    capabilities: Vec<Box<dyn Capability>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Appends a capability. Composition order matters: methods and
    /// carriers registered by capabilities added later override those
    /// added earlier.
    pub fn with_capability(mut self, capability: Box<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub async fn build(mut self, mut config: AgentConfig) -> Result<Agent> {
        let guard = CompositionGuard(());
        for capability in self.capabilities.iter_mut() {
            capability.init(&guard, &mut config).await?;
        }

        let mut registry = MethodRegistry::new();
        let mut carriers = CarrierRegistry::new();
        let mut urls = Vec::new();
        for capability in &self.capabilities {
            capability.register_methods(&mut registry);
            capability.register_carrier(&mut carriers);
            urls.extend(capability.urls());
        }

        let dispatch_handle = std::sync::Arc::new(registry.clone());
        for capability in &self.capabilities {
            capability.bind_dispatch(std::sync::Arc::clone(&dispatch_handle));
        }

        Ok(Agent {
            capabilities: self.capabilities,
            registry,
            carriers,
            urls,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A composed agent: the merged dispatch table, carrier registry, and url
/// list resulting from an `AgentBuilder` composition, plus the capabilities
/// themselves (kept alive for `disconnect`).
pub struct Agent {
    capabilities: Vec<Box<dyn Capability>>,
    registry: MethodRegistry,
    carriers: CarrierRegistry,
    urls: Vec<String>,
}

impl Agent {
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn features(&self) -> Vec<String> {
        self.registry.features()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn carriers(&self) -> &CarrierRegistry {
        &self.carriers
    }

    /// Parses, dispatches, and (for requests) replies to one inbound
    /// JSON-RPC message. `None` means the message was a well-formed
    /// notification and there is nothing to send back.
    pub async fn execute_request(&self, raw: &[u8]) -> Option<RawResponse> {
        crate::protocol::execute_request(&self.registry, raw).await
    }

    /// Tears down every capability in reverse composition order. Teardown
    /// is best-effort: a failing capability is logged and does not prevent
    /// the ones below it from also tearing down.
    pub async fn disconnect(&mut self) -> Result<()> {
        for capability in self.capabilities.iter_mut().rev() {
            if let Err(e) = capability.disconnect().await {
                tracing::warn!("capability disconnect failed: {}", e);
            }
        }
        Ok(())
    }
}
