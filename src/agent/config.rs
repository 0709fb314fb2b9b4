//! Construction-time configuration passed through a capability composition.
//!
//! One mapping, built by the caller, from which each capability's `init`
//! takes the keys it recognizes and leaves the rest for capabilities further
//! down the composition.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{JezebelError, Result};

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    values: HashMap<String, Value>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Removes and returns a raw value, for a capability that wants to
    /// inspect the JSON shape itself.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn take_string(&mut self, key: &str) -> Option<String> {
        match self.values.remove(key)? {
            Value::String(s) => Some(s),
            other => {
                self.values.insert(key.to_string(), other);
                None
            }
        }
    }

    pub fn take_u64(&mut self, key: &str) -> Option<u64> {
        match self.values.remove(key)? {
            Value::Number(n) => match n.as_u64() {
                Some(v) => Some(v),
                None => {
                    self.values.insert(key.to_string(), Value::Number(n));
                    None
                }
            },
            other => {
                self.values.insert(key.to_string(), other);
                None
            }
        }
    }

    pub fn take_f64(&mut self, key: &str) -> Option<f64> {
        match self.values.remove(key)? {
            Value::Number(n) => n.as_f64(),
            other => {
                self.values.insert(key.to_string(), other);
                None
            }
        }
    }

    /// Reads a timeout option as a float number of seconds — the wire/config
    /// shape a JSON `0.5` or `10` arrives in — rejecting negative values.
    /// Absent keys come back as `Ok(None)` (caller keeps its own default).
    pub fn take_timeout_secs(&mut self, key: &str) -> Result<Option<f64>> {
        match self.take_f64(key) {
            Some(secs) if secs < 0.0 => Err(JezebelError::CompositionError(format!(
                "{} must be non-negative, got {}",
                key, secs
            ))),
            Some(secs) => Ok(Some(secs)),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}
