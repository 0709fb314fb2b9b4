//! HTTP carrier: a deliberately HTTP/1.0 server (no mandatory headers to
//! get wrong) for inbound calls, plus a reqwest-based client for outbound
//! ones. One worker per connection, via a spawned tokio task per accepted
//! connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::agent::{AgentConfig, Capability, CompositionGuard};
use crate::carrier::{Carrier, CarrierRegistry};
use crate::dispatch::MethodRegistry;
use crate::error::{JezebelError, Result};
use crate::protocol::{self, RawRequest, RawResponse};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// HTTP carrier capability. Recognizes two configuration keys:
/// `server_address` (a `"host:port"` string — binds a server if present,
/// stays client-only otherwise) and `http_timeout` (a possibly-fractional
/// number of seconds, default 10, rejected if negative, applied to the
/// outbound client).
pub struct HttpCapability {
    bind_addr: Option<SocketAddr>,
    timeout: Duration,
    client: reqwest::Client,
    dispatch: Arc<OnceLock<Arc<MethodRegistry>>>,
    server_task: Option<JoinHandle<()>>,
    own_url: Option<String>,
}

impl HttpCapability {
    pub fn new() -> Self {
        Self {
            bind_addr: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
            dispatch: Arc::new(OnceLock::new()),
            server_task: None,
            own_url: None,
        }
    }
}

impl Default for HttpCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for HttpCapability {
    async fn init(&mut self, _guard: &CompositionGuard, config: &mut AgentConfig) -> Result<()> {
        if let Some(timeout_secs) = config.take_timeout_secs("http_timeout")? {
            self.timeout = Duration::from_secs_f64(timeout_secs);
        }
        self.client = reqwest::Client::builder().timeout(self.timeout).build()?;

        if let Some(address) = config.take_string("server_address") {
            let addr: SocketAddr = address.parse().map_err(|e| {
                JezebelError::CompositionError(format!("invalid server_address {}: {}", address, e))
            })?;
            let listener = TcpListener::bind(addr).await?;
            let bound = listener.local_addr()?;
            self.bind_addr = Some(bound);
            self.own_url = Some(format!("http://{}", bound));

            let dispatch = Arc::clone(&self.dispatch);
            self.server_task = Some(tokio::spawn(async move {
                serve(listener, dispatch).await;
            }));
            tracing::info!("http carrier listening on {}", bound);
        }

        Ok(())
    }

    fn register_methods(&self, _registry: &mut MethodRegistry) {}

    fn register_carrier(&self, carriers: &mut CarrierRegistry) {
        carriers.register(
            "http",
            Arc::new(HttpCarrier {
                client: self.client.clone(),
            }),
        );
    }

    fn bind_dispatch(&self, registry: Arc<MethodRegistry>) {
        let _ = self.dispatch.set(registry);
    }

    fn urls(&self) -> Vec<String> {
        self.own_url.clone().into_iter().collect()
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
        Ok(())
    }
}

async fn serve(listener: TcpListener, dispatch: Arc<OnceLock<Arc<MethodRegistry>>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("http accept failed: {}", e);
                continue;
            }
        };
        let dispatch = Arc::clone(&dispatch);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, dispatch).await {
                tracing::debug!("http connection from {} ended: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    dispatch: Arc<OnceLock<Arc<MethodRegistry>>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if request_line.trim().is_empty() {
        return Ok(());
    }

    let mut parts = request_line.trim_end().split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut headers: HashMap<String, String> = HashMap::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    match (method.as_str(), path.as_str()) {
        ("GET", "/") => {
            write_response(
                &mut writer,
                200,
                "OK",
                "text/html",
                b"<html><body>jezebel agent</body></html>",
            )
            .await
        }
        ("POST", "/") => handle_post(&mut reader, &mut writer, &headers, &dispatch).await,
        _ => {
            write_response(
                &mut writer,
                400,
                "Bad Request",
                "text/plain",
                b"unsupported method or path",
            )
            .await
        }
    }
}

async fn handle_post<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut W,
    headers: &HashMap<String, String>,
    dispatch: &Arc<OnceLock<Arc<MethodRegistry>>>,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWriteExt + Unpin,
{
    // All three headers are examined before anything else, matching the
    // HTTP-layer contract: any of them missing or wrong is a plain-text 400,
    // never a JSON-RPC error, and length/type/accept are independent checks
    // — a zero-length body does not exempt the Content-Type/Accept checks.
    let content_length: usize = match headers.get("content-length").and_then(|v| v.parse().ok()) {
        Some(len) => len,
        None => {
            return write_response(
                writer,
                400,
                "Bad Request",
                "text/plain",
                b"missing or unparseable Content-Length",
            )
            .await
        }
    };

    let content_type = match headers.get("content-type") {
        Some(v) => v,
        None => {
            return write_response(writer, 400, "Bad Request", "text/plain", b"missing Content-Type")
                .await
        }
    };
    if !content_type.contains("application/json") {
        return write_response(
            writer,
            400,
            "Bad Request",
            "text/plain",
            format!(
                "Invalid content type \"{}\" in request (it should contain \"application/json\")",
                content_type
            )
            .as_bytes(),
        )
        .await;
    }

    let accept = match headers.get("accept") {
        Some(v) => v,
        None => {
            return write_response(writer, 400, "Bad Request", "text/plain", b"missing Accept")
                .await
        }
    };
    if !accept.contains("application/json") {
        return write_response(
            writer,
            400,
            "Bad Request",
            "text/plain",
            format!(
                "Invalid acceptable content type \"{}\" in request (it should contain \"application/json\")",
                accept
            )
            .as_bytes(),
        )
        .await;
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    let registry = match dispatch.get() {
        Some(r) => r,
        None => {
            return write_response(
                writer,
                400,
                "Bad Request",
                "text/plain",
                b"agent not ready",
            )
            .await
        }
    };

    match protocol::execute_request(registry, &body).await {
        None => write_response(writer, 200, "OK", "application/json", b"").await,
        Some(response) => {
            let serialized = serde_json::to_vec(&response).unwrap_or_default();
            write_response(writer, 200, "OK", "application/json", &serialized).await
        }
    }
}

async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.0 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Outbound HTTP client carrier.
struct HttpCarrier {
    client: reqwest::Client,
}

#[async_trait]
impl Carrier for HttpCarrier {
    async fn send_request(&self, url: &str, request: RawRequest) -> Result<RawResponse> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| JezebelError::ConnectionFailed(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| JezebelError::ConnectionFailed(e.to_string()))?;

        protocol::parse_response(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBuilder, AgentConfig};
    use crate::call::{call, CallTarget};
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpStream as TokioTcpStream;

    #[tokio::test]
    async fn http_server_answers_liveness_get() {
        let agent = AgentBuilder::new()
            .with_capability(Box::new(HttpCapability::new()))
            .build({
                let mut config = AgentConfig::new();
                config.set("server_address", "127.0.0.1:0");
                config
            })
            .await
            .unwrap();

        let addr = agent.urls()[0].trim_start_matches("http://").to_string();
        let mut stream = TokioTcpStream::connect(&addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 200 OK"));
    }

    #[tokio::test]
    async fn disconnect_releasing_the_listener_twice_is_a_no_op() {
        let mut capability = HttpCapability::new();
        let guard = crate::agent::CompositionGuard::for_tests();
        let mut config = AgentConfig::new();
        config.set("server_address", "127.0.0.1:0");
        capability.init(&guard, &mut config).await.unwrap();

        capability.disconnect().await.unwrap();
        capability.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn http_server_rejects_bad_content_type() {
        let agent = AgentBuilder::new()
            .with_capability(Box::new(HttpCapability::new()))
            .build({
                let mut config = AgentConfig::new();
                config.set("server_address", "127.0.0.1:0");
                config
            })
            .await
            .unwrap();

        let addr = agent.urls()[0].trim_start_matches("http://").to_string();
        let mut stream = TokioTcpStream::connect(&addr).await.unwrap();
        let body = b"{}";
        let request = format!(
            "POST / HTTP/1.0\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 400"));
    }

    #[tokio::test]
    async fn http_server_rejects_missing_accept_header() {
        let agent = AgentBuilder::new()
            .with_capability(Box::new(HttpCapability::new()))
            .build({
                let mut config = AgentConfig::new();
                config.set("server_address", "127.0.0.1:0");
                config
            })
            .await
            .unwrap();

        let addr = agent.urls()[0].trim_start_matches("http://").to_string();
        let mut stream = TokioTcpStream::connect(&addr).await.unwrap();
        let body = b"{}";
        let request = format!(
            "POST / HTTP/1.0\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 400"));
    }

    #[tokio::test]
    async fn http_server_rejects_zero_length_post_with_wrong_content_type() {
        // Regression: the Content-Type check used to be skipped entirely
        // when Content-Length was 0.
        let agent = AgentBuilder::new()
            .with_capability(Box::new(HttpCapability::new()))
            .build({
                let mut config = AgentConfig::new();
                config.set("server_address", "127.0.0.1:0");
                config
            })
            .await
            .unwrap();

        let addr = agent.urls()[0].trim_start_matches("http://").to_string();
        let mut stream = TokioTcpStream::connect(&addr).await.unwrap();
        let request = "POST / HTTP/1.0\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 400"));
    }

    #[tokio::test]
    async fn end_to_end_http_call_round_trips() {
        use std::sync::Arc as StdArc;

        let agent = StdArc::new(
            AgentBuilder::new()
                .with_capability(Box::new(EchoCapability))
                .with_capability(Box::new(HttpCapability::new()))
                .build({
                    let mut config = AgentConfig::new();
                    config.set("server_address", "127.0.0.1:0");
                    config
                })
                .await
                .unwrap(),
        );

        let caller = StdArc::new(
            AgentBuilder::new()
                .with_capability(Box::new(HttpCapability::new()))
                .build(AgentConfig::new())
                .await
                .unwrap(),
        );

        let url = format!("{}/", agent.urls()[0]);
        let handle = call(
            StdArc::clone(&caller),
            CallTarget::Url(url),
            "echo",
            vec![Value::from("hi")],
            serde_json::Map::new(),
        );
        let result = handle.await.unwrap();
        assert_eq!(result, Value::from("hi"));
    }

    pub(crate) struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        async fn init(&mut self, _guard: &CompositionGuard, _config: &mut AgentConfig) -> Result<()> {
            Ok(())
        }

        fn register_methods(&self, registry: &mut MethodRegistry) {
            registry.register_sync("echo", |params| match params {
                crate::protocol::Params::Positional(mut args) if args.len() == 1 => {
                    Ok(args.remove(0))
                }
                _ => Ok(Value::Null),
            });
        }
    }
}
