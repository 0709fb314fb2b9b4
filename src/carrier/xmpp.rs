//! XMPP carrier: one bidirectional connection multiplexing every inbound
//! and outbound call. This is the hard carrier — unlike HTTP, which gets a
//! fresh connection per call, every outbound request and every inbound
//! reply share the same stream, so correlating a response to its request
//! needs an explicit pending-table instead of "the bytes that came back on
//! this socket".
//!
//! The pending table and its invariants are kept independent of the actual
//! `tokio_xmpp` wiring so they can be exercised directly in tests: register
//! the id, hand off to the connection task, wait. The one invariant that
//! matters is ordering — a request must be registered as pending *before*
//! it is handed to the connection task for sending, never after. Sending
//! first and registering second would let the reply win the race and
//! arrive at a point where nothing is listening for it.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_xmpp::SimpleClient;
use xmpp_parsers::message::{Message as XmppMessage, MessageType};
use xmpp_parsers::{Element, Jid};

use crate::agent::{AgentConfig, Capability, CompositionGuard};
use crate::carrier::{Carrier, CarrierRegistry};
use crate::dispatch::MethodRegistry;
use crate::error::{JezebelError, Result};
use crate::protocol::{self, RawRequest, RawResponse};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
enum SessionStatus {
    Init,
    Open,
    AuthFailed,
    ConnectionFailed(String),
}

/// A condition-variable equivalent: blocks until the connection is either
/// authenticated or has definitively failed to authenticate.
struct SessionLatch {
    status: std::sync::Mutex<SessionStatus>,
    notify: Notify,
}

impl SessionLatch {
    fn new() -> Self {
        Self {
            status: std::sync::Mutex::new(SessionStatus::Init),
            notify: Notify::new(),
        }
    }

    fn resolve(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status;
        self.notify.notify_waiters();
    }

    async fn wait_until_resolved(&self) -> SessionStatus {
        loop {
            let notified = self.notify.notified();
            {
                let current = self.status.lock().unwrap().clone();
                if current != SessionStatus::Init {
                    return current;
                }
            }
            notified.await;
        }
    }
}

/// Request ids currently awaiting a reply, and replies that have arrived
/// for ids no longer (or not yet) being waited on. A response is moved
/// straight from `received` to the caller on the first poll that finds it
/// there, so each id is ever completed exactly once.
#[derive(Default)]
struct PendingInner {
    pending: HashMap<String, ()>,
    received: HashMap<String, RawResponse>,
}

struct PendingTable {
    inner: Mutex<PendingInner>,
    notify: Notify,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            inner: Mutex::new(PendingInner::default()),
            notify: Notify::new(),
        }
    }

    async fn register(&self, id: &str) {
        self.inner.lock().await.pending.insert(id.to_string(), ());
    }

    async fn forget(&self, id: &str) {
        self.inner.lock().await.pending.remove(id);
    }

    /// Records a reply for `id`, but only if something is still waiting on
    /// it. A reply for an id that already timed out (and was forgotten) is
    /// dropped silently — this is the late-response case.
    async fn complete(&self, id: &str, response: RawResponse) {
        let mut inner = self.inner.lock().await;
        if inner.pending.contains_key(id) {
            inner.received.insert(id.to_string(), response);
            self.notify.notify_waiters();
        }
    }

    async fn take_completed(&self, id: &str) -> Option<RawResponse> {
        let mut inner = self.inner.lock().await;
        if let Some(response) = inner.received.remove(id) {
            inner.pending.remove(id);
            Some(response)
        } else {
            None
        }
    }

    /// Deep-copy snapshot of the ids still awaiting a reply, for
    /// introspection (`xmpp_pending`).
    async fn pending_snapshot(&self) -> Vec<String> {
        self.inner.lock().await.pending.keys().cloned().collect()
    }

    /// Deep-copy snapshot of replies that have arrived but not yet been
    /// claimed, for introspection (`xmpp_received`).
    async fn received_snapshot(&self) -> Vec<String> {
        self.inner.lock().await.received.keys().cloned().collect()
    }
}

/// Outbound XMPP carrier. Holds no connection state of its own — it hands
/// the serialized request to the connection task via `outbound` and waits
/// on the shared pending table.
struct XmppCarrier {
    pending: Arc<PendingTable>,
    outbound: mpsc::UnboundedSender<(String, String)>,
    timeout: Duration,
}

#[async_trait]
impl Carrier for XmppCarrier {
    async fn send_request(&self, url: &str, request: RawRequest) -> Result<RawResponse> {
        let to = url.trim_start_matches("xmpp:").to_string();
        let id = request
            .id
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| JezebelError::InvalidRequest("xmpp calls require an id".to_string()))?
            .to_string();

        // Register before sending — see module docs. If send fails, undo
        // the registration and surface the failure immediately rather than
        // waiting out the full timeout for a request that was never sent.
        self.pending.register(&id).await;

        let body = serde_json::to_string(&request)?;
        if self.outbound.send((to, body)).is_err() {
            self.pending.forget(&id).await;
            return Err(JezebelError::ConnectionFailed(
                "xmpp connection is closed".to_string(),
            ));
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            // Register interest in the next notification *before* checking
            // the table, not after: `Notify::notified()` captures the
            // current notification generation as soon as it's called, so a
            // `complete()` landing between this line and the `.await` below
            // still wakes this waiter. Checking first and registering after
            // would leave a window where a reply arriving in between is
            // never observed until the next timeout tick.
            let notified = self.pending.notify.notified();

            if let Some(response) = self.pending.take_completed(&id).await {
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.pending.forget(&id).await;
                return Err(JezebelError::Timeout);
            }

            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}

/// Handles one decoded inbound message body, shared by the real connection
/// task and by tests exercising the dispatch logic directly. Tries to parse
/// it as a response first; if that fails, treats it as a request and, if it
/// produced a reply, hands the reply back out over `outbound`.
async fn handle_inbound(
    from: &str,
    body: &[u8],
    pending: &PendingTable,
    dispatch: &std::sync::OnceLock<Arc<MethodRegistry>>,
    outbound: &mpsc::UnboundedSender<(String, String)>,
) {
    if let Ok(response) = protocol::parse_response(body) {
        if let Some(id) = response.id.as_str() {
            pending.complete(id, response).await;
        }
        return;
    }

    let Some(registry) = dispatch.get() else {
        tracing::warn!("xmpp message from {} arrived before dispatch was bound", from);
        return;
    };

    if let Some(reply) = protocol::execute_request(registry, body).await {
        if let Ok(reply_body) = serde_json::to_string(&reply) {
            let _ = outbound.send((from.to_string(), reply_body));
        }
    }
}

fn build_message_stanza(to: &Jid, body: &str) -> Element {
    let mut message = XmppMessage::new(Some(to.clone()));
    message.type_ = MessageType::Normal;
    message.bodies.insert(
        String::new(),
        xmpp_parsers::message::Body(body.to_string()),
    );
    message.into()
}

pub struct XmppCapability {
    jid: Option<String>,
    timeout: Duration,
    pending: Arc<PendingTable>,
    outbound: Option<mpsc::UnboundedSender<(String, String)>>,
    dispatch: Arc<std::sync::OnceLock<Arc<MethodRegistry>>>,
    connection_task: Option<JoinHandle<()>>,
    own_url: Option<String>,
}

impl XmppCapability {
    pub fn new() -> Self {
        Self {
            jid: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pending: Arc::new(PendingTable::new()),
            outbound: None,
            dispatch: Arc::new(std::sync::OnceLock::new()),
            connection_task: None,
            own_url: None,
        }
    }

    /// Ids still awaiting a reply, for introspection and tests.
    pub async fn xmpp_pending(&self) -> Vec<String> {
        self.pending.pending_snapshot().await
    }

    /// Replies that have arrived but not yet been claimed by their caller.
    pub async fn xmpp_received(&self) -> Vec<String> {
        self.pending.received_snapshot().await
    }
}

impl Default for XmppCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for XmppCapability {
    async fn init(&mut self, _guard: &CompositionGuard, config: &mut AgentConfig) -> Result<()> {
        if let Some(timeout_secs) = config.take_timeout_secs("xmpp_timeout")? {
            self.timeout = Duration::from_secs_f64(timeout_secs);
        }

        let jid = match config.take_string("jid") {
            Some(j) => j,
            // No jid configured: this capability contributes no carrier and
            // no inbound connection.
            None => return Ok(()),
        };
        let password = config.take_string("jpassword").ok_or_else(|| {
            JezebelError::CompositionError("jid given without jpassword".to_string())
        })?;

        // The actual connect-and-authenticate handshake happens inside the
        // spawned connection task, not here: `session_start`/`failed_auth`
        // are events of that handshake, and the latch must exist and be
        // awaited (with the configured timeout) for the whole handshake,
        // not just resolved after the fact once the handshake already
        // finished on this task.
        let latch = Arc::new(SessionLatch::new());
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(String, String)>();

        let pending = Arc::clone(&self.pending);
        let dispatch = Arc::clone(&self.dispatch);
        let connect_latch = Arc::clone(&latch);
        let connect_jid = jid.clone();

        self.connection_task = Some(tokio::spawn(async move {
            let mut client = match SimpleClient::new(&connect_jid, password).await {
                Ok(client) => {
                    // `SimpleClient::new` performing the full connect, SASL
                    // auth and stream negotiation and returning `Ok` is this
                    // carrier's `session_start`: the client is authenticated
                    // and the session is ready to send/receive stanzas.
                    connect_latch.resolve(SessionStatus::Open);
                    client
                }
                Err(e) => {
                    // tokio-xmpp surfaces SASL/auth rejection and a
                    // connection that never got off the ground through the
                    // same `Error` type; classify by message to recover the
                    // `failed_auth` vs. plain connection-failure distinction
                    // the original event handlers keep separate.
                    let message = e.to_string();
                    let status = if message.to_ascii_lowercase().contains("auth") {
                        SessionStatus::AuthFailed
                    } else {
                        SessionStatus::ConnectionFailed(message)
                    };
                    connect_latch.resolve(status);
                    return;
                }
            };

            loop {
                tokio::select! {
                    stanza = client.next() => {
                        match stanza {
                            Some(element) => {
                                if let Ok(message) = XmppMessage::try_from(element) {
                                    if !matches!(message.type_, MessageType::Normal | MessageType::Chat) {
                                        continue;
                                    }
                                    let Some(from) = message.from.clone() else { continue };
                                    let Some(body) = message.bodies.get("") else { continue };
                                    handle_inbound(&from.to_string(), body.0.as_bytes(), &pending, &dispatch, &outbound_tx).await;
                                }
                            }
                            None => break,
                        }
                    }
                    Some((to, body)) = outbound_rx.recv() => {
                        let to_jid: Jid = match to.parse() {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::warn!("invalid xmpp destination {}: {}", to, e);
                                continue;
                            }
                        };
                        let stanza = build_message_stanza(&to_jid, &body);
                        if let Err(e) = client.send(stanza).await {
                            tracing::warn!("xmpp send failed: {}", e);
                        }
                    }
                }
            }
        }));

        let resolved = tokio::time::timeout(self.timeout, latch.wait_until_resolved()).await;
        match resolved {
            Err(_elapsed) => {
                if let Some(task) = self.connection_task.take() {
                    task.abort();
                }
                return Err(JezebelError::ConnectionTimeout);
            }
            Ok(SessionStatus::Open) => {}
            Ok(SessionStatus::AuthFailed) => {
                if let Some(task) = self.connection_task.take() {
                    task.abort();
                }
                return Err(JezebelError::AuthFailed(jid));
            }
            Ok(SessionStatus::ConnectionFailed(message)) => {
                if let Some(task) = self.connection_task.take() {
                    task.abort();
                }
                return Err(JezebelError::ConnectionFailed(message));
            }
            Ok(SessionStatus::Init) => unreachable!("latch only resolves to a terminal status"),
        }

        self.own_url = Some(format!("xmpp:{}", jid));
        self.jid = Some(jid);
        self.outbound = Some(outbound_tx);

        Ok(())
    }

    fn register_methods(&self, _registry: &mut MethodRegistry) {}

    fn register_carrier(&self, carriers: &mut CarrierRegistry) {
        if let Some(outbound) = &self.outbound {
            carriers.register(
                "xmpp",
                Arc::new(XmppCarrier {
                    pending: Arc::clone(&self.pending),
                    outbound: outbound.clone(),
                    timeout: self.timeout,
                }),
            );
        }
    }

    fn bind_dispatch(&self, registry: Arc<MethodRegistry>) {
        let _ = self.dispatch.set(registry);
    }

    fn urls(&self) -> Vec<String> {
        self.own_url.clone().into_iter().collect()
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_body(id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({"jsonrpc": "2.0", "id": id, "result": "pong"})).unwrap()
    }

    #[tokio::test]
    async fn register_before_complete_is_observed() {
        let pending = PendingTable::new();
        pending.register("req-1").await;
        assert_eq!(pending.pending_snapshot().await, vec!["req-1".to_string()]);

        let response: RawResponse = serde_json::from_slice(&response_body("req-1")).unwrap();
        pending.complete("req-1", response).await;

        let completed = pending.take_completed("req-1").await.unwrap();
        assert_eq!(completed.result, Some(serde_json::Value::from("pong")));
        assert!(pending.pending_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn late_response_after_forget_is_dropped_silently() {
        let pending = PendingTable::new();
        pending.register("req-2").await;
        pending.forget("req-2").await;

        let response: RawResponse = serde_json::from_slice(&response_body("req-2")).unwrap();
        pending.complete("req-2", response).await;

        // Never registered (or already forgotten) -> never recorded.
        assert!(pending.take_completed("req-2").await.is_none());
    }

    #[tokio::test]
    async fn completion_is_observed_at_most_once() {
        let pending = PendingTable::new();
        pending.register("req-3").await;
        let response: RawResponse = serde_json::from_slice(&response_body("req-3")).unwrap();
        pending.complete("req-3", response).await;

        assert!(pending.take_completed("req-3").await.is_some());
        assert!(pending.take_completed("req-3").await.is_none());
    }

    #[tokio::test]
    async fn handle_inbound_request_sends_reply_over_outbound() {
        let mut registry = MethodRegistry::new();
        registry.register_sync("echo", |params| match params {
            crate::protocol::Params::Positional(mut args) if args.len() == 1 => Ok(args.remove(0)),
            _ => Ok(serde_json::Value::Null),
        });

        let dispatch = std::sync::OnceLock::new();
        dispatch.set(Arc::new(registry)).ok();

        let pending = PendingTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "echo",
            "params": ["hi"],
        }))
        .unwrap();

        handle_inbound("peer@example.com", &body, &pending, &dispatch, &tx).await;

        let (to, reply_body) = rx.try_recv().unwrap();
        assert_eq!(to, "peer@example.com");
        assert!(reply_body.contains("\"hi\""));
    }

    #[tokio::test]
    async fn handle_inbound_notification_sends_no_reply() {
        let mut registry = MethodRegistry::new();
        registry.register_sync("ping", |_| Ok(serde_json::Value::Null));
        let dispatch = std::sync::OnceLock::new();
        dispatch.set(Arc::new(registry)).ok();

        let pending = PendingTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let body = serde_json::to_vec(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        handle_inbound("peer@example.com", &body, &pending, &dispatch, &tx).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_latch_resolves_to_open() {
        let latch = SessionLatch::new();
        latch.resolve(SessionStatus::Open);
        assert_eq!(latch.wait_until_resolved().await, SessionStatus::Open);
    }

    #[tokio::test]
    async fn session_latch_resolves_to_auth_failed() {
        let latch = SessionLatch::new();
        latch.resolve(SessionStatus::AuthFailed);
        assert_eq!(latch.wait_until_resolved().await, SessionStatus::AuthFailed);
    }

    #[tokio::test]
    async fn session_latch_waiter_observes_a_resolution_that_happens_after_it_starts_waiting() {
        // Exercises the same register-before-check ordering as the real
        // session handshake: the waiter must already be polling by the time
        // `resolve` runs, and still has to observe it.
        let latch = Arc::new(SessionLatch::new());
        let waiter_latch = Arc::clone(&latch);
        let waiter = tokio::spawn(async move { waiter_latch.wait_until_resolved().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        latch.resolve(SessionStatus::Open);

        assert_eq!(waiter.await.unwrap(), SessionStatus::Open);
    }

    #[tokio::test]
    async fn send_request_times_out_when_no_response_ever_arrives() {
        // Spec §8 scenario 7: the peer never replies: the handle resolves
        // with a timeout and the id is gone from the pending table.
        let pending = Arc::new(PendingTable::new());
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(String, String)>();
        let carrier = XmppCarrier {
            pending: Arc::clone(&pending),
            outbound: outbound_tx,
            timeout: Duration::from_millis(50),
        };

        let request = RawRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::Value::String("never-answered".to_string())),
            method: "echo".to_string(),
            params: None,
        };

        let result = carrier.send_request("xmpp:peer@example.com", request).await;
        assert!(matches!(result, Err(JezebelError::Timeout)));
        assert!(pending.pending_snapshot().await.is_empty());

        // The request was actually handed off, not dropped before sending.
        assert!(outbound_rx.try_recv().is_ok());
    }
}
