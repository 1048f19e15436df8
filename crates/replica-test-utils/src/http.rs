//! [`FakeStoreServer`]: an HTTP/1.1 store double on `127.0.0.1:0`.
//!
//! Serves the two endpoints the store client uses:
//!
//! - `GET /collections`
//! - `GET /collections/{name}`
//!
//! Every connection is answered once and closed, which keeps the parser
//! trivial and is enough for `reqwest`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct FakeCollection {
    status: String,
    points: u64,
    fail_with: Option<u16>,
}

#[derive(Debug, Default)]
struct FakeState {
    collections: BTreeMap<String, FakeCollection>,
    required_key: Option<String>,
    status_override: Option<u16>,
    delay: Option<Duration>,
    requests: Vec<String>,
}

/// A running fake store. The listener stops when this value is dropped.
pub struct FakeStoreServer {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    handle: JoinHandle<()>,
}

impl FakeStoreServer {
    /// Bind to an ephemeral port and start serving an empty store.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("FakeStoreServer: failed to bind");
        let addr = listener
            .local_addr()
            .expect("FakeStoreServer: no local address");
        let state = Arc::new(Mutex::new(FakeState::default()));

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, shared).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Start a server pre-populated with `(name, points)` collections.
    pub async fn with_collections(collections: &[(&str, u64)]) -> Self {
        let server = Self::start().await;
        for (name, points) in collections {
            server.add_collection(name, *points);
        }
        server
    }

    /// Base URL, e.g. `http://127.0.0.1:40123`
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Add or replace a collection with `green` status.
    pub fn add_collection(&self, name: &str, points: u64) {
        self.lock().collections.insert(
            name.to_string(),
            FakeCollection {
                status: "green".to_string(),
                points,
                fail_with: None,
            },
        );
    }

    /// Override the lifecycle status reported for a collection.
    pub fn set_collection_status(&self, name: &str, status: &str) {
        if let Some(collection) = self.lock().collections.get_mut(name) {
            collection.status = status.to_string();
        }
    }

    /// Keep the collection listed, but make its detail lookup fail.
    pub fn fail_collection(&self, name: &str, code: u16) {
        if let Some(collection) = self.lock().collections.get_mut(name) {
            collection.fail_with = Some(code);
        }
    }

    /// Reject requests that do not carry `api-key: <key>` with 401.
    pub fn require_api_key(&self, key: &str) {
        self.lock().required_key = Some(key.to_string());
    }

    /// Answer every request with `code` and an empty JSON body.
    pub fn fail_all_with(&self, code: u16) {
        self.lock().status_override = Some(code);
    }

    /// Sleep before answering, to exercise client timeouts.
    pub fn delay_responses(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Request paths received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("FakeStoreServer: state poisoned")
    }
}

impl Drop for FakeStoreServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a local port nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("closed_port_url: failed to bind");
    let addr = listener.local_addr().expect("closed_port_url: no address");
    drop(listener);
    format!("http://{}", addr)
}

async fn serve_connection(stream: TcpStream, state: Arc<Mutex<FakeState>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut api_key = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("api-key") {
                api_key = Some(value.trim().to_string());
            }
        }
    }

    let (delay, code, body) = {
        let mut state = state.lock().expect("FakeStoreServer: state poisoned");
        state.requests.push(path.clone());
        let (code, body) = route(&state, &path, api_key.as_deref());
        (state.delay, code, body)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        reason(code),
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn route(state: &FakeState, path: &str, api_key: Option<&str>) -> (u16, serde_json::Value) {
    if let Some(code) = state.status_override {
        return (code, json!({}));
    }
    if let Some(required) = &state.required_key {
        if api_key != Some(required.as_str()) {
            return (401, json!({ "status": { "error": "Invalid api-key" } }));
        }
    }

    if path == "/collections" {
        let collections: Vec<_> = state
            .collections
            .keys()
            .map(|name| json!({ "name": name }))
            .collect();
        return (200, json!({ "result": { "collections": collections } }));
    }

    if let Some(encoded) = path.strip_prefix("/collections/") {
        let name = percent_encoding::percent_decode_str(encoded)
            .decode_utf8_lossy()
            .into_owned();
        return match state.collections.get(&name) {
            Some(collection) => match collection.fail_with {
                Some(code) => (code, json!({})),
                None => (
                    200,
                    json!({
                        "result": {
                            "status": collection.status,
                            "points_count": collection.points,
                            "vectors_count": collection.points,
                            "indexed_vectors_count": collection.points,
                        }
                    }),
                ),
            },
            None => (
                404,
                json!({ "status": { "error": format!("Collection `{}` doesn't exist!", name) } }),
            ),
        };
    }

    (404, json!({}))
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
