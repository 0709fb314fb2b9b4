//! Call orchestration: dispatching a method call either to another
//! in-process agent or across a carrier addressed by URL, without blocking
//! the caller on the result.
//!
//! Both the agent-target and url-target paths run on a spawned tokio task
//! that reports back through a oneshot channel, rather than blocking the
//! calling task on the network round trip.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use url::Url;

use crate::agent::Agent;
use crate::error::{JezebelError, Result};
use crate::protocol;

/// Where a call is headed: another agent composed in the same process, or
/// a URL whose scheme picks out a registered carrier.
pub enum CallTarget {
    Agent(Arc<Agent>),
    Url(String),
}

/// A pending call result. Polling it drives nothing — the call already
/// runs on its own spawned task — `Handle` just observes completion.
pub struct Handle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Handle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(JezebelError::InternalError("call task dropped".to_string())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Issues one call. `caller` supplies the carrier registry used when
/// `target` is a URL — it is otherwise unused for an in-process `Agent`
/// target, since the target agent's own registry handles the request.
pub fn call(
    caller: Arc<Agent>,
    target: CallTarget,
    method: impl Into<String>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Handle<Value> {
    let (tx, rx) = oneshot::channel();
    let method = method.into();

    tokio::spawn(async move {
        let result = run_call(caller, target, &method, args, kwargs).await;
        let _ = tx.send(result);
    });

    Handle { rx }
}

async fn run_call(
    caller: Arc<Agent>,
    target: CallTarget,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Result<Value> {
    let request = protocol::build_request(method, args, kwargs)?;

    match target {
        CallTarget::Agent(target_agent) => {
            let raw = serde_json::to_vec(&request)?;
            let response = target_agent
                .execute_request(&raw)
                .await
                .expect("a call request always carries an id and gets a reply");
            respond(response)
        }
        CallTarget::Url(url) => {
            let scheme = Url::parse(&url)
                .map_err(|e| JezebelError::UnknownScheme(format!("{}: {}", url, e)))?
                .scheme()
                .to_string();

            let carrier = caller
                .carriers()
                .get(&scheme)
                .ok_or_else(|| JezebelError::UnknownScheme(scheme.clone()))?;

            let response = carrier.send_request(&url, request).await?;
            respond(response)
        }
    }
}

fn respond(response: protocol::RawResponse) -> Result<Value> {
    if let Some(error) = response.error {
        Err(protocol::translate_rpc_error(error.code, &error.message))
    } else {
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBuilder, AgentConfig, Capability, CompositionGuard};
    use crate::dispatch::MethodRegistry;
    use crate::protocol::Params;
    use async_trait::async_trait;

    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        async fn init(&mut self, _guard: &CompositionGuard, _config: &mut AgentConfig) -> Result<()> {
            Ok(())
        }

        fn register_methods(&self, registry: &mut MethodRegistry) {
            registry.register_sync("echo", |params| match params {
                Params::Positional(mut args) if args.len() == 1 => Ok(args.remove(0)),
                _ => Ok(Value::Null),
            });
        }
    }

    struct FailingCapability;

    #[async_trait]
    impl Capability for FailingCapability {
        async fn init(&mut self, _guard: &CompositionGuard, _config: &mut AgentConfig) -> Result<()> {
            Ok(())
        }

        fn register_methods(&self, _registry: &mut MethodRegistry) {}
    }

    #[tokio::test]
    async fn in_process_call_returns_result() {
        let target = Arc::new(
            AgentBuilder::new()
                .with_capability(Box::new(EchoCapability))
                .build(AgentConfig::new())
                .await
                .unwrap(),
        );
        let caller = Arc::new(
            AgentBuilder::new()
                .with_capability(Box::new(FailingCapability))
                .build(AgentConfig::new())
                .await
                .unwrap(),
        );

        let handle = call(
            caller,
            CallTarget::Agent(target),
            "echo",
            vec![Value::from(42)],
            Map::new(),
        );
        assert_eq!(handle.await.unwrap(), Value::from(42));
    }

    #[tokio::test]
    async fn in_process_call_to_unknown_method_translates_error() {
        let target = Arc::new(
            AgentBuilder::new()
                .with_capability(Box::new(FailingCapability))
                .build(AgentConfig::new())
                .await
                .unwrap(),
        );
        let caller = Arc::clone(&target);

        let handle = call(
            caller,
            CallTarget::Agent(target),
            "missing",
            vec![],
            Map::new(),
        );
        let err = handle.await.unwrap_err();
        assert!(matches!(err, JezebelError::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn url_call_with_unknown_scheme_fails_fast() {
        let caller = Arc::new(
            AgentBuilder::new()
                .with_capability(Box::new(FailingCapability))
                .build(AgentConfig::new())
                .await
                .unwrap(),
        );

        let handle = call(
            caller,
            CallTarget::Url("gopher://example.com/rpc".to_string()),
            "echo",
            vec![],
            Map::new(),
        );
        let err = handle.await.unwrap_err();
        assert!(matches!(err, JezebelError::UnknownScheme(_)));
    }
}
