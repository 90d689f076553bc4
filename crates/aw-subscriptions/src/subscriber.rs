//! Subscriber-side callback processing: the sequencing state machine, resync
//! transition, and the low-granularity fetch/ack round trip.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aw_peer_proxy::{PeerProxy, ProxyTimeouts};
use aw_protocol::{CallbackEnvelope, DiffPayload, ParsedCallback, PendingCallback, SubscriberState};
use aw_storage::AttributeStore;
use aw_trust::TrustStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

const STATE_BUCKET: &str = "subscriber_state";

/// `SubscriberState`/`PendingCallback` don't derive `Serialize` in
/// `aw-protocol` (they're plain in-memory types); this is the persisted
/// mirror, keeping the wire `CallbackEnvelope` as the queued payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSubscriberState {
    last_processed_sequence: u64,
    pending: BTreeMap<u64, CallbackEnvelope>,
    last_updated: DateTime<Utc>,
}

impl From<&SubscriberState> for StoredSubscriberState {
    fn from(state: &SubscriberState) -> Self {
        Self {
            last_processed_sequence: state.last_processed_sequence,
            pending: state.pending.iter().map(|(seq, pc)| (*seq, pc.envelope.clone())).collect(),
            last_updated: state.last_updated,
        }
    }
}

fn hydrate(actor_id: String, publisher_id: String, subscription_id: String, stored: StoredSubscriberState) -> SubscriberState {
    SubscriberState {
        actor_id,
        publisher_id,
        subscription_id,
        last_processed_sequence: stored.last_processed_sequence,
        pending: stored
            .pending
            .into_iter()
            .map(|(seq, envelope)| (seq, PendingCallback { sequence: seq, envelope }))
            .collect(),
        last_updated: stored.last_updated,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CallbackProcessorConfig {
    pub pending_queue_bound: usize,
}

impl Default for CallbackProcessorConfig {
    fn default() -> Self {
        Self { pending_queue_bound: 100 }
    }
}

/// Outcome of processing one callback envelope; maps directly onto the
/// HTTP status the illustrative gateway's callback endpoint returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Processed,
    Duplicate,
    Queued,
    BackPressure,
    Malformed(String),
}

impl ProcessOutcome {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ProcessOutcome::Processed | ProcessOutcome::Duplicate | ProcessOutcome::Queued => 204,
            ProcessOutcome::BackPressure => 429,
            ProcessOutcome::Malformed(_) => 400,
        }
    }
}

/// Application hooks invoked once a diff or resync is ready to apply. List
/// mutations (`{"list:<name>": {...}}`) are not unpacked here — the
/// application layer extracts them from the payload via
/// `aw_protocol::as_list_mutation` and applies them to its own mirror.
#[async_trait]
pub trait CallbackHooks: Send + Sync {
    async fn on_diff(&self, publisher_id: &str, subscription_id: &str, target: &str, subtarget: Option<&str>, sequence: u64, payload: &Value);
    async fn on_resync(&self, publisher_id: &str, subscription_id: &str, target: &str, subtarget: Option<&str>, sequence: u64, baseline: &Value);
}

#[derive(Debug, Clone, Default)]
struct ProcessorStats {
    processed: u64,
    duplicate: u64,
    gapped: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionStats {
    pub processed: u64,
    pub duplicate: u64,
    pub gapped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionHealth {
    pub publisher_id: String,
    pub subscription_id: String,
    pub last_processed_sequence: u64,
    pub pending_depth: usize,
}

/// Per-actor sequencing state for every `(publisher_id, subscription_id)`
/// this actor subscribes to.
pub struct CallbackProcessor {
    actor_id: String,
    store: Arc<dyn AttributeStore>,
    trust: TrustStore,
    client: reqwest::Client,
    config: CallbackProcessorConfig,
    stats: RwLock<HashMap<(String, String), ProcessorStats>>,
}

impl CallbackProcessor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>, store: Arc<dyn AttributeStore>, config: CallbackProcessorConfig) -> Self {
        Self {
            actor_id: actor_id.into(),
            trust: TrustStore::new(store.clone()),
            store,
            client: reqwest::Client::new(),
            config,
            stats: RwLock::new(HashMap::new()),
        }
    }

    fn state_key(publisher_id: &str, subscription_id: &str) -> String {
        format!("{publisher_id}:{subscription_id}")
    }

    async fn load_state(&self, publisher_id: &str, subscription_id: &str) -> SubscriberState {
        let key = Self::state_key(publisher_id, subscription_id);
        match self.store.get_attr(&self.actor_id, STATE_BUCKET, &key).await {
            Some(attr) => match serde_json::from_value::<StoredSubscriberState>(attr.data) {
                Ok(stored) => hydrate(self.actor_id.clone(), publisher_id.to_string(), subscription_id.to_string(), stored),
                Err(_) => SubscriberState::new(self.actor_id.clone(), publisher_id.to_string(), subscription_id.to_string(), Utc::now()),
            },
            None => SubscriberState::new(self.actor_id.clone(), publisher_id.to_string(), subscription_id.to_string(), Utc::now()),
        }
    }

    async fn save_state(&self, state: &SubscriberState) {
        let key = Self::state_key(&state.publisher_id, &state.subscription_id);
        let stored = StoredSubscriberState::from(state);
        let Ok(value) = serde_json::to_value(&stored) else { return };
        if !self.store.set_attr(&self.actor_id, STATE_BUCKET, &key, value).await {
            tracing::warn!(publisher_id = %state.publisher_id, subscription_id = %state.subscription_id, "failed to persist subscriber sequencing state");
        }
    }

    async fn bump(&self, publisher_id: &str, subscription_id: &str, f: impl FnOnce(&mut ProcessorStats)) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry((publisher_id.to_string(), subscription_id.to_string())).or_default();
        f(entry);
    }

    /// Process one validated callback envelope per the sequencing state
    /// machine: duplicates/late arrivals are a no-op, an in-order envelope
    /// advances and drains contiguous pending entries, a gap is queued
    /// (or rejected with back-pressure once the queue is full), and a
    /// resync resets the sequence baseline unconditionally.
    pub async fn process(&self, publisher_id: &str, envelope: CallbackEnvelope, hooks: &dyn CallbackHooks) -> ProcessOutcome {
        let raw = envelope.clone();
        let parsed = match envelope.parse() {
            Ok(p) => p,
            Err(e) => return ProcessOutcome::Malformed(e.0),
        };
        let subscription_id = parsed.subscription_id().to_string();
        let sequence = parsed.sequence();
        let mut state = self.load_state(publisher_id, &subscription_id).await;

        if matches!(parsed, ParsedCallback::Resync { .. }) {
            self.apply(publisher_id, parsed, hooks).await;
            state.last_processed_sequence = sequence;
            state.pending.retain(|&seq, _| seq > sequence);
            state.last_updated = Utc::now();
            self.drain_pending(publisher_id, &mut state, hooks).await;
            self.save_state(&state).await;
            self.bump(publisher_id, &subscription_id, |s| s.processed += 1).await;
            return ProcessOutcome::Processed;
        }

        if sequence <= state.last_processed_sequence {
            self.bump(publisher_id, &subscription_id, |s| s.duplicate += 1).await;
            return ProcessOutcome::Duplicate;
        }

        if sequence == state.last_processed_sequence + 1 {
            self.apply(publisher_id, parsed, hooks).await;
            state.last_processed_sequence = sequence;
            state.last_updated = Utc::now();
            self.drain_pending(publisher_id, &mut state, hooks).await;
            self.save_state(&state).await;
            self.bump(publisher_id, &subscription_id, |s| s.processed += 1).await;
            return ProcessOutcome::Processed;
        }

        if state.pending.len() >= self.config.pending_queue_bound {
            self.bump(publisher_id, &subscription_id, |s| s.gapped += 1).await;
            return ProcessOutcome::BackPressure;
        }
        state.pending.insert(sequence, PendingCallback { sequence, envelope: raw });
        state.last_updated = Utc::now();
        self.save_state(&state).await;
        self.bump(publisher_id, &subscription_id, |s| s.gapped += 1).await;
        ProcessOutcome::Queued
    }

    async fn drain_pending(&self, publisher_id: &str, state: &mut SubscriberState, hooks: &dyn CallbackHooks) {
        loop {
            let next = state.last_processed_sequence + 1;
            let Some(pending) = state.pending.remove(&next) else { break };
            let Ok(parsed) = pending.envelope.parse() else { continue };
            self.apply(publisher_id, parsed, hooks).await;
            state.last_processed_sequence = next;
        }
    }

    async fn apply(&self, publisher_id: &str, parsed: ParsedCallback, hooks: &dyn CallbackHooks) {
        match parsed {
            ParsedCallback::Diff { target, subtarget, subscription_id, sequence, body, .. } => {
                let is_low = matches!(body, DiffPayload::Url(_));
                let payload = self.resolve_payload(publisher_id, body).await;
                hooks.on_diff(publisher_id, &subscription_id, &target, subtarget.as_deref(), sequence, &payload).await;
                if is_low {
                    self.send_ack(publisher_id, &subscription_id, sequence);
                }
            }
            ParsedCallback::Resync { target, subtarget, subscription_id, sequence, baseline, .. } => {
                let payload = self.resolve_payload(publisher_id, baseline).await;
                hooks.on_resync(publisher_id, &subscription_id, &target, subtarget.as_deref(), sequence, &payload).await;
            }
        }
    }

    async fn resolve_payload(&self, publisher_id: &str, body: DiffPayload) -> Value {
        match body {
            DiffPayload::Data(value) => value,
            DiffPayload::Url(url) => self.fetch_snapshot(publisher_id, &url).await.unwrap_or(Value::Null),
        }
    }

    /// Fetches an out-of-line diff body or resource snapshot, Bearer
    /// authenticated with the trust held toward the publisher. The target
    /// is an arbitrary absolute URL rather than a path relative to the
    /// publisher's `baseuri`, so this goes directly through `reqwest`
    /// instead of `aw_peer_proxy::PeerProxy` (which only builds
    /// `baseuri`-relative paths).
    async fn fetch_snapshot(&self, publisher_id: &str, url: &str) -> Option<Value> {
        let trust = self.trust.get_trust(&self.actor_id, publisher_id).await?;
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", trust.secret))
            .send()
            .await
            .ok()?;
        response.json::<Value>().await.ok()
    }

    /// Fire-and-forget ack PUT for a non-resync low-granularity delivery,
    /// telling the publisher this subscriber has caught up to `sequence`.
    fn send_ack(&self, publisher_id: &str, subscription_id: &str, sequence: u64) {
        let store = self.store.clone();
        let actor_id = self.actor_id.clone();
        let publisher_id = publisher_id.to_string();
        let subscription_id = subscription_id.to_string();
        tokio::spawn(async move {
            let trust_store = TrustStore::new(store);
            let Some(trust) = trust_store.get_trust(&actor_id, &publisher_id).await else { return };
            if !trust.is_usable_for_calls() {
                return;
            }
            let Ok(proxy) = PeerProxy::new(&trust, None, ProxyTimeouts::default()) else { return };
            proxy
                .change_resource(&format!("subscriptions/{actor_id}/{subscription_id}"), &json!({ "sequence": sequence }))
                .await;
        });
    }

    pub async fn health_snapshot(&self, publisher_id: &str, subscription_id: &str) -> SubscriptionHealth {
        let state = self.load_state(publisher_id, subscription_id).await;
        SubscriptionHealth {
            publisher_id: publisher_id.to_string(),
            subscription_id: subscription_id.to_string(),
            last_processed_sequence: state.last_processed_sequence,
            pending_depth: state.pending.len(),
        }
    }

    pub async fn stats_snapshot(&self, publisher_id: &str, subscription_id: &str) -> SubscriptionStats {
        let stats = self.stats.read().await;
        stats
            .get(&(publisher_id.to_string(), subscription_id.to_string()))
            .map(|s| SubscriptionStats { processed: s.processed, duplicate: s.duplicate, gapped: s.gapped })
            .unwrap_or_default()
    }
}
