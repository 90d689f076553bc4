//! A minimal, in-process mock HTTP peer for integration tests.
//!
//! Tests bind an actual `axum` server to `127.0.0.1:0` and issue real HTTP
//! requests against it, rather than depending on a network-mocking crate.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_type: &'static str,
}

impl ScriptedResponse {
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Bytes::from(body.into()),
            content_type: "text/plain",
        }
    }

    #[must_use]
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            body: Bytes::from(serde_json::to_vec(&value).expect("serializable json value")),
            content_type: "application/json",
        }
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
            content_type: "text/plain",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

struct RouteQueue {
    scripted: VecDeque<ScriptedResponse>,
    sticky: Option<ScriptedResponse>,
}

#[derive(Default)]
struct SharedState {
    routes: HashMap<String, RouteQueue>,
    requests: Vec<RecordedRequest>,
}

/// A mock peer server: routes are configured with fixed or scripted
/// responses, and every inbound request is recorded for assertions.
pub struct MockPeer {
    addr: SocketAddr,
    state: Arc<RwLock<SharedState>>,
    server: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start() -> Self {
        let state: Arc<RwLock<SharedState>> = Arc::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let app = Router::new()
            .fallback(handle_any)
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock peer server");
        });

        Self { addr, state, server }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_text_route(&self, path: impl Into<String>, body: impl Into<String>) {
        self.set_sticky(path, ScriptedResponse::text(200, body)).await;
    }

    pub async fn set_json_route(&self, path: impl Into<String>, value: Value) {
        self.set_sticky(path, ScriptedResponse::json(200, value)).await;
    }

    pub async fn set_status_route(&self, path: impl Into<String>, status: u16) {
        self.set_sticky(path, ScriptedResponse::empty(status)).await;
    }

    async fn set_sticky(&self, path: impl Into<String>, response: ScriptedResponse) {
        let mut state = self.state.write().await;
        state.routes.insert(
            path.into(),
            RouteQueue {
                scripted: VecDeque::new(),
                sticky: Some(response),
            },
        );
    }

    /// Queue a sequence of one-shot responses for `path`; each request pops
    /// the next entry, and the last entry sticks once the queue drains.
    /// Useful for scripting a retry (e.g. 401 then 200).
    pub async fn push_sequence(&self, path: impl Into<String>, responses: Vec<ScriptedResponse>) {
        let mut queue: VecDeque<ScriptedResponse> = responses.into();
        let sticky = queue.back().cloned();
        let mut state = self.state.write().await;
        state.routes.insert(path.into(), RouteQueue { scripted: queue, sticky });
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.read().await.requests.clone()
    }

    pub async fn request_count(&self, path: &str) -> usize {
        self.state.read().await.requests.iter().filter(|r| r.path == path).count()
    }

    pub fn shutdown(self) {
        self.server.abort();
    }
}

async fn handle_any(
    State(state): State<Arc<RwLock<SharedState>>>,
    method: Method,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let mut state = state.write().await;
    state.requests.push(RecordedRequest {
        method,
        path: path.clone(),
        headers,
        body,
    });

    let response = state.routes.get_mut(&path).and_then(|queue| {
        if let Some(next) = queue.scripted.pop_front() {
            Some(next)
        } else {
            queue.sticky.clone()
        }
    });

    match response {
        Some(scripted) => Response::builder()
            .status(StatusCode::from_u16(scripted.status).unwrap_or(StatusCode::OK))
            .header("content-type", scripted.content_type)
            .body(axum::body::Body::from(scripted.body))
            .expect("valid response"),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(axum::body::Body::empty())
            .expect("valid response"),
    }
}
