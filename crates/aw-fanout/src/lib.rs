//! Bounded-concurrency callback delivery to subscribers: granularity
//! downgrade, optional gzip compression, and circuit-breaker-gated dispatch.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use aw_circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use aw_protocol::{option_tags, CallbackEnvelope, Granularity};
use aw_storage::AttributeStore;
use aw_trust::TrustStore;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{OnceCell, Semaphore};

static SHARED_CLIENT: OnceCell<reqwest::Client> = OnceCell::const_new();

async fn shared_client(timeout: Duration) -> reqwest::Client {
    SHARED_CLIENT
        .get_or_init(|| async move {
            reqwest::Client::builder()
                .timeout(timeout)
                .pool_max_idle_per_host(20)
                .pool_idle_timeout(Duration::from_secs(30))
                .build()
                .expect("build shared fan-out http client")
        })
        .await
        .clone()
}

#[derive(Debug, Clone, Copy)]
pub struct FanOutConfig {
    pub max_concurrent: usize,
    pub max_payload_for_high_granularity: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
    pub request_timeout: Duration,
    pub enable_compression: bool,
    pub persist_circuit_breakers: bool,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_payload_for_high_granularity: 65536,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_seconds: 60,
            request_timeout: Duration::from_secs(30),
            enable_compression: true,
            persist_circuit_breakers: true,
        }
    }
}

const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct SubscriberTarget {
    pub peer_id: String,
    pub subscription_id: String,
    pub callback_url: String,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub peer_id: String,
    pub subscription_id: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub retry_after: Option<u64>,
    pub granularity_downgraded: bool,
}

impl DeliveryResult {
    fn failure(target: &SubscriberTarget, error: impl Into<String>) -> Self {
        Self {
            peer_id: target.peer_id.clone(),
            subscription_id: target.subscription_id.clone(),
            success: false,
            status_code: None,
            error: Some(error.into()),
            retry_after: None,
            granularity_downgraded: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub circuit_open: usize,
    pub results: Vec<DeliveryResult>,
}

/// Delivers one change to every subscriber of `(target, sequence)`,
/// enforcing a bounded concurrency window and gating each delivery on that
/// peer's circuit breaker.
pub struct FanOutManager {
    actor_id: String,
    proto_fqdn: String,
    trust: TrustStore,
    breakers: CircuitBreakerRegistry,
    client: reqwest::Client,
    config: FanOutConfig,
}

impl FanOutManager {
    /// `proto_fqdn` is `"<scheme>://<host>"`, used to build the downgraded
    /// resource URL (`<proto_fqdn>/<actor_id>/<target>`).
    pub async fn new(
        actor_id: impl Into<String>,
        proto_fqdn: impl Into<String>,
        store: Arc<dyn AttributeStore>,
        config: FanOutConfig,
    ) -> Self {
        let actor_id = actor_id.into();
        let breakers = CircuitBreakerRegistry::load(
            actor_id.clone(),
            store.clone(),
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_threshold,
                cooldown_seconds: config.circuit_breaker_cooldown_seconds,
            },
            config.persist_circuit_breakers,
        )
        .await;
        let client = shared_client(config.request_timeout).await;
        Self {
            actor_id,
            proto_fqdn: proto_fqdn.into(),
            trust: TrustStore::new(store),
            breakers,
            client,
            config,
        }
    }

    pub async fn deliver_to_subscribers(
        &self,
        subscriptions: &[SubscriberTarget],
        payload: &Value,
        target: &str,
        sequence: u64,
    ) -> FanOutResult {
        if subscriptions.is_empty() {
            return FanOutResult::default();
        }

        let payload_len = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0);
        let needs_downgrade = payload_len > self.config.max_payload_for_high_granularity;
        let semaphore = Semaphore::new(self.config.max_concurrent);

        let deliveries = subscriptions
            .iter()
            .map(|sub| self.deliver_one(sub, payload, needs_downgrade, target, sequence, &semaphore));
        let results: Vec<DeliveryResult> = join_all(deliveries).await;

        let mut successful = 0;
        let mut failed = 0;
        let mut circuit_open = 0;
        for result in &results {
            if result.success {
                successful += 1;
            } else if result.error.as_deref() == Some("circuit_open") {
                circuit_open += 1;
            } else {
                failed += 1;
            }
        }

        FanOutResult {
            total: subscriptions.len(),
            successful,
            failed,
            circuit_open,
            results,
        }
    }

    async fn deliver_one(
        &self,
        sub: &SubscriberTarget,
        payload: &Value,
        needs_downgrade: bool,
        target: &str,
        sequence: u64,
        semaphore: &Semaphore,
    ) -> DeliveryResult {
        if !self.breakers.should_allow(&sub.peer_id).await {
            return DeliveryResult::failure(sub, "circuit_open");
        }

        let Ok(_permit) = semaphore.acquire().await else {
            return DeliveryResult::failure(sub, "request_error: semaphore closed");
        };
        self.deliver_single(sub, payload, needs_downgrade, target, sequence).await
    }

    async fn deliver_single(
        &self,
        sub: &SubscriberTarget,
        payload: &Value,
        needs_downgrade: bool,
        target: &str,
        sequence: u64,
    ) -> DeliveryResult {
        let mut granularity_downgraded = false;
        let mut envelope = CallbackEnvelope {
            id: self.actor_id.clone(),
            target: target.to_string(),
            subtarget: None,
            sequence,
            timestamp: Utc::now(),
            granularity: sub.granularity,
            subscriptionid: sub.subscription_id.clone(),
            kind: None,
            data: None,
            url: None,
        };

        if needs_downgrade && sub.granularity == Granularity::High {
            granularity_downgraded = true;
            envelope.granularity = Granularity::Low;
            envelope.url = Some(format!("{}/{}/{}", self.proto_fqdn.trim_end_matches('/'), self.actor_id, target));
        } else {
            envelope.data = Some(payload.clone());
        }

        let Ok(mut body) = serde_json::to_vec(&envelope) else {
            return DeliveryResult::failure(sub, "request_error: envelope serialization failed");
        };

        let mut request = self.client.post(sub.callback_url.as_str()).header("Content-Type", "application/json");
        if granularity_downgraded {
            request = request.header("X-ActingWeb-Granularity-Downgraded", "true");
        }

        if self.config.enable_compression && body.len() > COMPRESSION_THRESHOLD_BYTES {
            let trust = self.trust.get_trust(&self.actor_id, &sub.peer_id).await;
            let peer_supports_compression = trust
                .as_ref()
                .is_some_and(|t| t.aw_supported.split(',').map(str::trim).any(|tag| tag == option_tags::CALLBACK_COMPRESSION));
            if peer_supports_compression {
                if let Some(compressed) = gzip_compress(&body) {
                    body = compressed;
                    request = request.header("Content-Encoding", "gzip");
                }
            }
        }

        if let Some(trust) = self.trust.get_trust(&self.actor_id, &sub.peer_id).await {
            request = request.header("Authorization", format!("Bearer {}", trust.secret));
        }

        let response = request.body(body).send().await;
        self.interpret_response(sub, granularity_downgraded, response).await
    }

    async fn interpret_response(
        &self,
        sub: &SubscriberTarget,
        granularity_downgraded: bool,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> DeliveryResult {
        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                self.breakers.record_failure(&sub.peer_id).await;
                let error = if err.is_timeout() {
                    "timeout".to_string()
                } else {
                    format!("request_error: {err}")
                };
                return DeliveryResult::failure(sub, error);
            }
        };

        let status = response.status().as_u16();
        match status {
            200 | 204 => {
                self.breakers.record_success(&sub.peer_id).await;
                DeliveryResult {
                    peer_id: sub.peer_id.clone(),
                    subscription_id: sub.subscription_id.clone(),
                    success: true,
                    status_code: Some(status),
                    error: None,
                    retry_after: None,
                    granularity_downgraded,
                }
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                self.breakers.record_failure(&sub.peer_id).await;
                DeliveryResult {
                    peer_id: sub.peer_id.clone(),
                    subscription_id: sub.subscription_id.clone(),
                    success: false,
                    status_code: Some(status),
                    error: Some("rate_limited".to_string()),
                    retry_after,
                    granularity_downgraded,
                }
            }
            503 => {
                self.breakers.record_failure(&sub.peer_id).await;
                DeliveryResult {
                    peer_id: sub.peer_id.clone(),
                    subscription_id: sub.subscription_id.clone(),
                    success: false,
                    status_code: Some(status),
                    error: Some("service_unavailable".to_string()),
                    retry_after: None,
                    granularity_downgraded,
                }
            }
            other => {
                self.breakers.record_failure(&sub.peer_id).await;
                DeliveryResult {
                    peer_id: sub.peer_id.clone(),
                    subscription_id: sub.subscription_id.clone(),
                    success: false,
                    status_code: Some(other),
                    error: Some(format!("http_error_{other}")),
                    retry_after: None,
                    granularity_downgraded,
                }
            }
        }
    }

    pub async fn circuit_breaker_status(&self) -> std::collections::HashMap<String, aw_protocol::CircuitBreakerRecord> {
        self.breakers.status().await
    }

    pub async fn reset_circuit_breaker(&self, peer_id: &str) {
        self.breakers.reset(peer_id).await;
    }

    /// Synchronous wrapper for call sites that cannot be made cooperative,
    /// a concession the original also makes (`deliver_to_subscribers_sync`).
    pub fn deliver_to_subscribers_sync(
        &self,
        subscriptions: &[SubscriberTarget],
        payload: &Value,
        target: &str,
        sequence: u64,
    ) -> FanOutResult {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build current-thread runtime")
            .block_on(self.deliver_to_subscribers(subscriptions, payload, target, sequence))
    }
}

fn gzip_compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}
