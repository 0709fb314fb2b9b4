//! Minimal demo binary: composes an agent exposing a couple of trivial
//! methods over HTTP, logs its own URL, and serves until interrupted.
//!
//! Process startup and configuration loading are deliberately thin here —
//! driving an agent programmatically (the library's actual surface) is
//! `jezebel::AgentBuilder`, not this binary.

use jezebel::{Agent, AgentBuilder, AgentConfig, Capability, CompositionGuard, HttpCapability};
use jezebel::{MethodRegistry, Result};

struct DemoCapability;

#[async_trait::async_trait]
impl Capability for DemoCapability {
    async fn init(&mut self, _guard: &CompositionGuard, _config: &mut AgentConfig) -> Result<()> {
        Ok(())
    }

    fn register_methods(&self, registry: &mut MethodRegistry) {
        registry.register_sync("hello_world", |_| Ok(serde_json::Value::from("hello world")));
        registry.register_sync("hello_empty", |_| Ok(serde_json::Value::Null));
        registry.register_sync("echo", |params| match params {
            jezebel::protocol::Params::Positional(mut args) if args.len() == 1 => {
                Ok(args.remove(0))
            }
            other => Err(jezebel::JezebelError::InvalidParams(format!(
                "echo takes exactly one positional argument, got {:?}",
                other
            ))),
        });
        // hello_wrong is deliberately not registered here: it exercises the
        // not-found path in tests. There is nothing to register for it.
    }
}

async fn build_demo_agent() -> Result<Agent> {
    let mut config = AgentConfig::new();
    config.set("server_address", "127.0.0.1:7878");

    AgentBuilder::new()
        .with_capability(Box::new(DemoCapability))
        .with_capability(Box::new(HttpCapability::new()))
        .build(config)
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let _ = dotenvy::from_filename(".env.local");

    let mut agent = build_demo_agent().await?;
    tracing::info!("jezebel demo agent listening at {:?}", agent.urls());
    tracing::info!("exposed methods: {:?}", agent.features());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    agent.disconnect().await?;

    Ok(())
}
