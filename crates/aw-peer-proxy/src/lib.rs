//! Outbound peer-to-peer resource calls: request construction, the
//! single Bearer→Basic retry, and structured response handling.
//!
//! Sync and async call sites share one `async` implementation;
//! [`PeerProxy::blocking`] exposes it to non-async callers via a dedicated
//! current-thread runtime for one-off synchronous calls.

use std::time::Duration;

use aw_protocol::TrustRecord;
use base64::Engine as _;
use reqwest::header::{HeaderMap, AUTHORIZATION, LOCATION};
use reqwest::Method;
use serde_json::{json, Value};

/// Connect/read timeout pair. Defaults mirror the 5s connect / 20s read
/// split the original source hard-codes.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for ProxyTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(20),
        }
    }
}

impl ProxyTimeouts {
    #[must_use]
    pub fn scalar(seconds: u64) -> Self {
        Self {
            connect: Duration::from_secs(seconds),
            read: Duration::from_secs(seconds),
        }
    }
}

/// The outcome of one peer call: always returned once a request is actually
/// attempted, including transport failures (whose `body` carries the
/// synthesized `{error: {code, message}}` shape rather than an error type).
#[derive(Debug, Clone, PartialEq)]
pub struct PeerResponse {
    pub status: u16,
    pub body: Value,
    pub location: Option<String>,
}

impl PeerResponse {
    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": { "code": status, "message": message.into() } }),
            location: None,
        }
    }
}

pub struct PeerProxy {
    client: reqwest::Client,
    baseuri: String,
    secret: String,
    trustee_passphrase: Option<String>,
}

impl PeerProxy {
    /// Builds a proxy from a loaded trust record — a target descriptor of
    /// `(actor_id, peer_id, passphrase?)` resolves to a trust record
    /// upstream and calls this constructor the same way.
    pub fn new(trust: &TrustRecord, trustee_passphrase: Option<String>, timeouts: ProxyTimeouts) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.read)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            baseuri: trust.baseuri.clone(),
            secret: trust.secret.clone(),
            trustee_passphrase,
        })
    }

    fn usable(&self) -> bool {
        !self.baseuri.is_empty() && !self.secret.is_empty()
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.baseuri.trim_end_matches('/'), path.trim_matches('/'))
    }

    fn headers(&self, request_id: &str, basic: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if basic {
            if let Some(passphrase) = &self.trustee_passphrase {
                let token = base64::engine::general_purpose::STANDARD.encode(format!("trustee:{passphrase}"));
                if let Ok(value) = format!("Basic {token}").parse() {
                    headers.insert(AUTHORIZATION, value);
                }
            }
        } else if let Ok(value) = format!("Bearer {}", self.secret).parse() {
            headers.insert(AUTHORIZATION, value);
        }
        if let Ok(value) = request_id.parse() {
            headers.insert("X-Request-ID", value);
        }
        if let Some(parent) = aw_context::get_request_id() {
            if let Ok(value) = parent.parse() {
                headers.insert("X-Parent-Request-ID", value);
            }
        }
        headers
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self.client.request(method, url).headers(headers);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(b) = body {
            builder = builder.json(b);
        }
        builder.send().await
    }

    fn classify_transport_error(err: &reqwest::Error) -> PeerResponse {
        if err.is_timeout() {
            PeerResponse::error(408, "Unable to communicate with trust peer service.")
        } else if err.is_connect() {
            PeerResponse::error(502, "Unable to communicate with trust peer service.")
        } else {
            PeerResponse::error(500, "Unable to communicate with trust peer service.")
        }
    }

    async fn call(&self, method: Method, path: &str, query: &[(String, String)], body: Option<&Value>) -> Option<PeerResponse> {
        if !self.usable() {
            return None;
        }
        let url = self.build_url(path);
        let request_id = aw_context::generate_request_id();
        tracing::debug!(%url, "calling peer resource");

        let first = self.execute(method.clone(), &url, query, body, self.headers(&request_id, false)).await;
        let response = match first {
            Ok(resp) if matches!(resp.status().as_u16(), 302 | 401 | 403) && self.trustee_passphrase.is_some() => {
                match self.execute(method, &url, query, body, self.headers(&request_id, true)).await {
                    Ok(retry) => retry,
                    Err(_) => resp,
                }
            }
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(error = %err, "transport failure calling peer resource");
                return Some(Self::classify_transport_error(&err));
            }
        };

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();
        let body_value = match serde_json::from_str::<Value>(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => json!({
                "error": { "code": status.as_u16(), "message": format!("HTTP {} with non-JSON response", status.as_u16()) }
            }),
            Err(_) => json!({}),
        };

        if !status.is_success() {
            tracing::info!(%status, "peer resource call returned a non-2xx status");
        }

        Some(PeerResponse {
            status: status.as_u16(),
            body: body_value,
            location,
        })
    }

    pub async fn get_resource(&self, path: &str, params: &[(String, String)]) -> Option<PeerResponse> {
        self.call(Method::GET, path, params, None).await
    }

    pub async fn create_resource(&self, path: &str, body: &Value) -> Option<PeerResponse> {
        self.call(Method::POST, path, &[], Some(body)).await
    }

    pub async fn change_resource(&self, path: &str, body: &Value) -> Option<PeerResponse> {
        self.call(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete_resource(&self, path: &str) -> Option<PeerResponse> {
        self.call(Method::DELETE, path, &[], None).await
    }

    /// Blocking wrapper for non-async callers, using a short-lived
    /// `reqwest::Client` for one-off synchronous calls.
    #[must_use]
    pub fn blocking(trust: &TrustRecord, trustee_passphrase: Option<String>, timeouts: ProxyTimeouts) -> Result<BlockingPeerProxy, reqwest::Error> {
        Ok(BlockingPeerProxy {
            inner: Self::new(trust, trustee_passphrase, timeouts)?,
        })
    }
}

pub struct BlockingPeerProxy {
    inner: PeerProxy,
}

impl BlockingPeerProxy {
    pub fn get_resource(&self, path: &str, params: &[(String, String)]) -> Option<PeerResponse> {
        Self::run(self.inner.get_resource(path, params))
    }

    pub fn create_resource(&self, path: &str, body: &Value) -> Option<PeerResponse> {
        Self::run(self.inner.create_resource(path, body))
    }

    pub fn change_resource(&self, path: &str, body: &Value) -> Option<PeerResponse> {
        Self::run(self.inner.change_resource(path, body))
    }

    pub fn delete_resource(&self, path: &str) -> Option<PeerResponse> {
        Self::run(self.inner.delete_resource(path))
    }

    fn run<F: std::future::Future<Output = Option<PeerResponse>>>(fut: F) -> Option<PeerResponse> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build current-thread runtime")
            .block_on(fut)
    }
}
