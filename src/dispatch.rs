//! Method registry: the dispatch table a composed agent exposes.
//!
//! Only methods a capability explicitly registers ever land in here, which
//! is what makes "not exposed" and "not found" the same observable outcome —
//! there is no separate visibility flag to check, because there is nothing
//! to check against for a method that was never inserted.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{JezebelError, Result};
use crate::protocol::types::Params;

type HandlerFn = dyn Fn(Params) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A registered method handler. Cloning a registry shares handlers rather
/// than duplicating them, which is what composition needs: later
/// capabilities overriding an earlier one just replace the `Arc` in the map.
pub type Handler = Arc<HandlerFn>;

#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Registers an async method handler. A second registration under the
    /// same name replaces the first — this is how a later capability in a
    /// composition overrides an earlier one's method of the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
    }

    /// Registers a synchronous method handler, for the common case of a
    /// method that does no I/O of its own.
    pub fn register_sync<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, move |params| {
            let result = handler(params);
            Box::pin(async move { result })
        });
    }

    /// Merges `other` into `self` in composition order: methods in `other`
    /// override methods of the same name already present.
    pub fn merge(&mut self, other: MethodRegistry) {
        self.methods.extend(other.methods);
    }

    pub async fn call(&self, method: &str, params: Params) -> Result<Value> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| JezebelError::MethodNotFound(method.to_string()))?
            .clone();
        handler(params).await
    }

    /// The set of rpc-exposed method names — exactly the registry's keys,
    /// since nothing else ever gets inserted.
    pub fn features(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_sync_and_call() {
        let mut registry = MethodRegistry::new();
        registry.register_sync("hello_world", |_| Ok(Value::from("hello world")));

        let result = registry.call("hello_world", Params::None).await.unwrap();
        assert_eq!(result, Value::from("hello world"));
    }

    #[tokio::test]
    async fn unregistered_method_is_not_found() {
        let registry = MethodRegistry::new();
        let result = registry.call("hello_wrong", Params::None).await;
        assert!(matches!(result, Err(JezebelError::MethodNotFound(_))));
    }

    #[test]
    fn features_lists_only_registered_methods() {
        let mut registry = MethodRegistry::new();
        registry.register_sync("hello_world", |_| Ok(Value::Null));
        registry.register_sync("hello_empty", |_| Ok(Value::Null));
        // hello_wrong is deliberately never registered.
        assert_eq!(registry.features(), vec!["hello_empty", "hello_world"]);
    }

    #[test]
    fn merge_lets_later_registrations_override_earlier_ones() {
        let mut base = MethodRegistry::new();
        base.register_sync("greet", |_| Ok(Value::from("base")));

        let mut override_registry = MethodRegistry::new();
        override_registry.register_sync("greet", |_| Ok(Value::from("override")));

        base.merge(override_registry);
        assert_eq!(base.features(), vec!["greet"]);
    }

    #[tokio::test]
    async fn merge_overridden_handler_wins() {
        let mut base = MethodRegistry::new();
        base.register_sync("greet", |_| Ok(Value::from("base")));

        let mut override_registry = MethodRegistry::new();
        override_registry.register_sync("greet", |_| Ok(Value::from("override")));

        base.merge(override_registry);
        let result = base.call("greet", Params::None).await.unwrap();
        assert_eq!(result, Value::from("override"));
    }
}
