//! Transport carriers. Each capability that can originate outbound calls
//! registers an explicit `Carrier` under the URL scheme it handles, and
//! `call::call` looks it up in this map — there is no reflection-based
//! dispatch by scheme name.

pub mod http;
pub mod xmpp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use http::HttpCapability;
pub use xmpp::XmppCapability;

use crate::error::Result;
use crate::protocol::{RawRequest, RawResponse};

/// Sends one request over a specific wire transport and returns the parsed
/// response. Implementations own whatever connection state they need
/// (an HTTP client, an open XMPP stream).
#[async_trait]
pub trait Carrier: Send + Sync {
    async fn send_request(&self, url: &str, request: RawRequest) -> Result<RawResponse>;
}

#[derive(Clone, Default)]
pub struct CarrierRegistry {
    carriers: HashMap<String, Arc<dyn Carrier>>,
}

impl CarrierRegistry {
    pub fn new() -> Self {
        Self {
            carriers: HashMap::new(),
        }
    }

    pub fn register(&mut self, scheme: impl Into<String>, carrier: Arc<dyn Carrier>) {
        self.carriers.insert(scheme.into(), carrier);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Carrier>> {
        self.carriers.get(scheme).cloned()
    }
}
