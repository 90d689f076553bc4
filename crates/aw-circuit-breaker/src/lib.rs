//! Per-peer circuit breaker state machine, persisted across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use aw_protocol::{CircuitBreakerRecord, CircuitState};
use aw_storage::AttributeStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

const CB_STATE_BUCKET: &str = "_circuit_breaker_state";

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 60,
        }
    }
}

/// A single peer's circuit breaker: closed → open after `failure_threshold`
/// consecutive failures, open → half-open after `cooldown_seconds`, and any
/// state → closed on a success.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreaker {
    pub peer_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(peer_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
            failure_threshold: config.failure_threshold,
            cooldown_seconds: config.cooldown_seconds,
        }
    }

    /// Reset-on-success from any state.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.failure_count = 0;
        self.last_success_time = Some(now);
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_failure_time = Some(now);
        if self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    /// Whether a delivery attempt should proceed. May transition `open` to
    /// `half_open` once the cooldown has elapsed — that transition counts as
    /// a state-changing event and must be persisted by the caller.
    pub fn should_allow_request(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map_or(ChronoDuration::zero(), |t| now - t);
                if elapsed >= ChronoDuration::seconds(i64::try_from(self.cooldown_seconds).unwrap_or(i64::MAX)) {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    #[must_use]
    pub fn to_record(&self) -> CircuitBreakerRecord {
        CircuitBreakerRecord {
            peer_id: self.peer_id.clone(),
            state: self.state,
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            failure_threshold: self.failure_threshold,
            cooldown_seconds: self.cooldown_seconds,
        }
    }

    /// Rebuild from a persisted record, applying the *current* config's
    /// threshold/cooldown rather than the persisted ones — an operator
    /// tightening the config should apply retroactively on reload.
    #[must_use]
    pub fn from_record(record: CircuitBreakerRecord, config: CircuitBreakerConfig) -> Self {
        Self {
            peer_id: record.peer_id,
            state: record.state,
            failure_count: record.failure_count,
            last_failure_time: record.last_failure_time,
            last_success_time: record.last_success_time,
            failure_threshold: config.failure_threshold,
            cooldown_seconds: config.cooldown_seconds,
        }
    }
}

/// Per-actor circuit breaker map, owned by the fan-out manager; external
/// callers observe only via [`CircuitBreakerRegistry::status`] and
/// [`CircuitBreakerRegistry::reset`].
pub struct CircuitBreakerRegistry {
    actor_id: String,
    store: Arc<dyn AttributeStore>,
    config: CircuitBreakerConfig,
    persist: bool,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Bulk-loads all existing records for `actor_id` from storage and
    /// indexes them in memory.
    pub async fn load(
        actor_id: impl Into<String>,
        store: Arc<dyn AttributeStore>,
        config: CircuitBreakerConfig,
        persist: bool,
    ) -> Self {
        let actor_id = actor_id.into();
        let mut breakers = HashMap::new();
        if persist {
            let all = store.get_bucket(&actor_id, CB_STATE_BUCKET).await;
            for (name, attr) in all {
                let Some(peer_id) = name.strip_prefix("cb:") else {
                    continue;
                };
                if let Ok(record) = serde_json::from_value::<CircuitBreakerRecord>(attr.data) {
                    breakers.insert(peer_id.to_string(), CircuitBreaker::from_record(record, config));
                }
            }
        }
        Self {
            actor_id,
            store,
            config,
            persist,
            breakers: RwLock::new(breakers),
        }
    }

    async fn persist_one(&self, breaker: &CircuitBreaker) {
        if !self.persist {
            return;
        }
        let Ok(value) = serde_json::to_value(breaker.to_record()) else {
            tracing::warn!(peer_id = %breaker.peer_id, "failed to serialize circuit breaker record");
            return;
        };
        let key = format!("cb:{}", breaker.peer_id);
        if !self.store.set_attr(&self.actor_id, CB_STATE_BUCKET, &key, value).await {
            tracing::warn!(peer_id = %breaker.peer_id, "failed to persist circuit breaker state");
        }
    }

    async fn load_single(&self, peer_id: &str) -> Option<CircuitBreaker> {
        if !self.persist {
            return None;
        }
        let key = format!("cb:{peer_id}");
        let attr = self.store.get_attr(&self.actor_id, CB_STATE_BUCKET, &key).await?;
        let record: CircuitBreakerRecord = serde_json::from_value(attr.data).ok()?;
        Some(CircuitBreaker::from_record(record, self.config))
    }

    /// True if a delivery attempt to `peer_id` should proceed right now.
    pub async fn should_allow(&self, peer_id: &str) -> bool {
        let now = Utc::now();
        let mut breakers = self.breakers.write().await;
        if !breakers.contains_key(peer_id) {
            let cb = match self.load_single(peer_id).await {
                Some(cb) => cb,
                None => CircuitBreaker::new(peer_id, self.config),
            };
            breakers.insert(peer_id.to_string(), cb);
        }
        let cb = breakers.get_mut(peer_id).expect("just inserted");
        let prior_state = cb.state;
        let allowed = cb.should_allow_request(now);
        if cb.state != prior_state {
            self.persist_one(cb).await;
        }
        allowed
    }

    pub async fn record_success(&self, peer_id: &str) {
        let now = Utc::now();
        let mut breakers = self.breakers.write().await;
        let cb = breakers
            .entry(peer_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(peer_id, self.config));
        cb.record_success(now);
        self.persist_one(cb).await;
    }

    pub async fn record_failure(&self, peer_id: &str) {
        let now = Utc::now();
        let mut breakers = self.breakers.write().await;
        let cb = breakers
            .entry(peer_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(peer_id, self.config));
        cb.record_failure(now);
        self.persist_one(cb).await;
    }

    /// Manual reset: discards history and persists a fresh closed breaker.
    pub async fn reset(&self, peer_id: &str) {
        let cb = CircuitBreaker::new(peer_id, self.config);
        self.persist_one(&cb).await;
        self.breakers.write().await.insert(peer_id.to_string(), cb);
    }

    pub async fn status(&self) -> HashMap<String, CircuitBreakerRecord> {
        self.breakers
            .read()
            .await
            .iter()
            .map(|(peer_id, cb)| (peer_id.clone(), cb.to_record()))
            .collect()
    }
}
