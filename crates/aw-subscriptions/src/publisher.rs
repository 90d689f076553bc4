//! Publisher-side subscription engine: sequence/diff recording, suspension
//! and resync-on-resume, cascade-on-trust-delete.

use std::collections::HashMap;
use std::sync::Arc;

use aw_fanout::{FanOutManager, FanOutResult, SubscriberTarget};
use aw_protocol::{option_tags, CallbackEnvelope, Granularity, Subscription, SubscriptionDiff};
use aw_storage::AttributeStore;
use aw_trust::TrustStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const SUBSCRIPTIONS_BUCKET: &str = "subscriptions";
const DIFFS_BUCKET: &str = "subscription_diffs";
const SUSPENSIONS_BUCKET: &str = "_subscription_suspensions";

/// Diffs are recorded with their payload always inline (`data`); the `url`
/// form only ever appears transiently at delivery time (granularity
/// downgrade, resync-by-reference), never in the retained log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDiff {
    sequence: u64,
    timestamp: DateTime<Utc>,
    data: Value,
}

#[derive(Debug, Clone)]
pub struct SubscriptionEngineConfig {
    /// If true, `record_mutation` dispatches through the fan-out manager
    /// inline and returns once delivery completes. If false, dispatch is
    /// spawned and the call returns immediately with
    /// `DispatchOutcome::Deferred`.
    pub sync_subscription_callbacks: bool,
}

impl Default for SubscriptionEngineConfig {
    fn default() -> Self {
        Self { sync_subscription_callbacks: true }
    }
}

/// A request to create one subscription, used by [`SubscriptionEngine::subscribe_batch`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub target: String,
    pub subtarget: Option<String>,
    pub granularity: Granularity,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Immediate(FanOutResult),
    Deferred,
    Suspended,
}

#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub updated_subscriptions: Vec<Subscription>,
    pub dispatch: DispatchOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOutcome {
    /// Number of subscriptions that received a resume callback.
    pub affected: usize,
}

/// Maintains the per-peer subscription table and diff log for one actor,
/// dispatching through a shared [`FanOutManager`] on every matching mutation.
pub struct SubscriptionEngine {
    actor_id: String,
    proto_fqdn: String,
    store: Arc<dyn AttributeStore>,
    trust: TrustStore,
    fanout: Arc<FanOutManager>,
    client: reqwest::Client,
    config: SubscriptionEngineConfig,
}

impl SubscriptionEngine {
    pub fn new(
        actor_id: impl Into<String>,
        proto_fqdn: impl Into<String>,
        store: Arc<dyn AttributeStore>,
        fanout: Arc<FanOutManager>,
        config: SubscriptionEngineConfig,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            proto_fqdn: proto_fqdn.into(),
            trust: TrustStore::new(store.clone()),
            store,
            fanout,
            client: reqwest::Client::new(),
            config,
        }
    }

    fn subscription_key(peer_id: &str, subscription_id: &str) -> String {
        format!("{peer_id}:{subscription_id}")
    }

    fn suspension_key(target: &str, subtarget: Option<&str>) -> String {
        format!("{target}:{}", subtarget.unwrap_or(""))
    }

    async fn put_subscription(&self, sub: &Subscription) -> bool {
        let Ok(value) = serde_json::to_value(sub) else { return false };
        self.store
            .set_attr(&self.actor_id, SUBSCRIPTIONS_BUCKET, &Self::subscription_key(&sub.peer_id, &sub.subscription_id), value)
            .await
    }

    pub async fn subscribe(
        &self,
        peer_id: &str,
        target: &str,
        subtarget: Option<String>,
        granularity: Granularity,
        callback_url: String,
    ) -> Subscription {
        let sub = Subscription {
            actor_id: self.actor_id.clone(),
            peer_id: peer_id.to_string(),
            subscription_id: format!("sub-{}", uuid::Uuid::new_v4()),
            target: target.to_string(),
            subtarget,
            granularity,
            sequence: 0,
            callback_url,
        };
        self.put_subscription(&sub).await;
        sub
    }

    /// Batch creation. Each request is still recorded individually — only
    /// the caller-facing entry point is batched; this does not change
    /// single-subscription semantics.
    pub async fn subscribe_batch(&self, peer_id: &str, requests: Vec<SubscriptionRequest>) -> Vec<Subscription> {
        let mut created = Vec::with_capacity(requests.len());
        for req in requests {
            created.push(self.subscribe(peer_id, &req.target, req.subtarget, req.granularity, req.callback_url).await);
        }
        created
    }

    pub async fn get_subscription(&self, peer_id: &str, subscription_id: &str) -> Option<Subscription> {
        let attr = self
            .store
            .get_attr(&self.actor_id, SUBSCRIPTIONS_BUCKET, &Self::subscription_key(peer_id, subscription_id))
            .await?;
        serde_json::from_value(attr.data).ok()
    }

    pub async fn list_subscriptions(&self) -> Vec<Subscription> {
        self.store
            .get_bucket(&self.actor_id, SUBSCRIPTIONS_BUCKET)
            .await
            .into_values()
            .filter_map(|v| serde_json::from_value(v.data).ok())
            .collect()
    }

    pub async fn list_subscriptions_for_peer(&self, peer_id: &str) -> Vec<Subscription> {
        self.list_subscriptions().await.into_iter().filter(|s| s.peer_id == peer_id).collect()
    }

    pub async fn delete_subscription(&self, peer_id: &str, subscription_id: &str) -> bool {
        let key = Self::subscription_key(peer_id, subscription_id);
        let removed = self.store.delete_attr(&self.actor_id, SUBSCRIPTIONS_BUCKET, &key).await;
        self.store.delete_attr(&self.actor_id, DIFFS_BUCKET, &key).await;
        removed
    }

    /// Trust deletion cascades: every subscription and diff belonging to
    /// the pair is removed.
    pub async fn cascade_trust_deletion(&self, peer_id: &str) -> usize {
        let subs = self.list_subscriptions_for_peer(peer_id).await;
        for sub in &subs {
            self.delete_subscription(peer_id, &sub.subscription_id).await;
        }
        subs.len()
    }

    async fn load_diffs(&self, peer_id: &str, subscription_id: &str) -> Vec<StoredDiff> {
        let key = Self::subscription_key(peer_id, subscription_id);
        self.store
            .get_attr(&self.actor_id, DIFFS_BUCKET, &key)
            .await
            .and_then(|a| serde_json::from_value(a.data).ok())
            .unwrap_or_default()
    }

    async fn save_diffs(&self, peer_id: &str, subscription_id: &str, diffs: &[StoredDiff]) -> bool {
        let Ok(value) = serde_json::to_value(diffs) else { return false };
        self.store
            .set_attr(&self.actor_id, DIFFS_BUCKET, &Self::subscription_key(peer_id, subscription_id), value)
            .await
    }

    async fn append_diff(&self, sub: &Subscription, payload: Value) {
        let mut diffs = self.load_diffs(&sub.peer_id, &sub.subscription_id).await;
        diffs.push(StoredDiff { sequence: sub.sequence, timestamp: Utc::now(), data: payload });
        if !self.save_diffs(&sub.peer_id, &sub.subscription_id, &diffs).await {
            tracing::warn!(peer_id = %sub.peer_id, subscription_id = %sub.subscription_id, "failed to persist subscription diff");
        }
    }

    /// `GET /subscriptions/<peer_id>/<sub_id>` surface: current sequence and
    /// the diffs retained since the last acknowledgement.
    pub async fn list_diffs(&self, peer_id: &str, subscription_id: &str) -> Vec<SubscriptionDiff> {
        self.load_diffs(peer_id, subscription_id)
            .await
            .into_iter()
            .map(|d| SubscriptionDiff {
                actor_id: self.actor_id.clone(),
                peer_id: peer_id.to_string(),
                subscription_id: subscription_id.to_string(),
                sequence: d.sequence,
                timestamp: d.timestamp,
                payload: aw_protocol::DiffPayload::Data(d.data),
            })
            .collect()
    }

    /// `PUT /subscriptions/<peer_id>/<sub_id>` with `{sequence: n}`: clears
    /// retained diffs at or below `n`.
    pub async fn acknowledge(&self, peer_id: &str, subscription_id: &str, sequence: u64) -> bool {
        let mut diffs = self.load_diffs(peer_id, subscription_id).await;
        diffs.retain(|d| d.sequence > sequence);
        self.save_diffs(peer_id, subscription_id, &diffs).await
    }

    async fn is_suspended(&self, target: &str, subtarget: Option<&str>) -> bool {
        self.store
            .get_attr(&self.actor_id, SUSPENSIONS_BUCKET, &Self::suspension_key(target, subtarget))
            .await
            .is_some()
    }

    pub async fn suspend(&self, target: &str, subtarget: Option<&str>) -> bool {
        self.store
            .set_attr(
                &self.actor_id,
                SUSPENSIONS_BUCKET,
                &Self::suspension_key(target, subtarget),
                json!({ "suspended_at": Utc::now() }),
            )
            .await
    }

    async fn matching_subscriptions(&self, target: &str, subtarget: Option<&str>) -> Vec<Subscription> {
        let mut matching = Vec::new();
        for sub in self.list_subscriptions().await {
            if sub.target != target || sub.subtarget.as_deref() != subtarget {
                continue;
            }
            let Some(trust) = self.trust.get_trust(&self.actor_id, &sub.peer_id).await else { continue };
            if !trust.approved {
                continue;
            }
            matching.push(sub);
        }
        matching
    }

    /// Record one mutation against `(target, subtarget)`: every matching,
    /// approved subscription has its sequence advanced and a diff appended,
    /// then either dispatches through the fan-out manager or is held back
    /// while suspended.
    pub async fn record_mutation(&self, target: &str, subtarget: Option<&str>, payload: Value) -> MutationOutcome {
        let subs = self.matching_subscriptions(target, subtarget).await;
        if subs.is_empty() {
            return MutationOutcome { updated_subscriptions: Vec::new(), dispatch: DispatchOutcome::Immediate(FanOutResult::default()) };
        }

        let suspended = self.is_suspended(target, subtarget).await;
        let mut updated = Vec::with_capacity(subs.len());
        let mut groups: HashMap<u64, Vec<SubscriberTarget>> = HashMap::new();
        for mut sub in subs {
            sub.sequence += 1;
            self.put_subscription(&sub).await;
            self.append_diff(&sub, payload.clone()).await;
            groups.entry(sub.sequence).or_default().push(SubscriberTarget {
                peer_id: sub.peer_id.clone(),
                subscription_id: sub.subscription_id.clone(),
                callback_url: sub.callback_url.clone(),
                granularity: sub.granularity,
            });
            updated.push(sub);
        }

        if suspended {
            return MutationOutcome { updated_subscriptions: updated, dispatch: DispatchOutcome::Suspended };
        }

        if self.config.sync_subscription_callbacks {
            let mut aggregate = FanOutResult::default();
            for (sequence, group) in groups {
                let result = self.fanout.deliver_to_subscribers(&group, &payload, target, sequence).await;
                aggregate.total += result.total;
                aggregate.successful += result.successful;
                aggregate.failed += result.failed;
                aggregate.circuit_open += result.circuit_open;
                aggregate.results.extend(result.results);
            }
            MutationOutcome { updated_subscriptions: updated, dispatch: DispatchOutcome::Immediate(aggregate) }
        } else {
            let fanout = self.fanout.clone();
            let target = target.to_string();
            tokio::spawn(async move {
                for (sequence, group) in groups {
                    fanout.deliver_to_subscribers(&group, &payload, &target, sequence).await;
                }
            });
            MutationOutcome { updated_subscriptions: updated, dispatch: DispatchOutcome::Deferred }
        }
    }

    /// Resume delivery for `(target, subtarget)` after a suspension. Per
    /// affected subscription: a `type:"resync"` envelope carrying `baseline`
    /// inline if the peer advertises `subscriptionresync`, otherwise a
    /// low-granularity envelope pointing at the canonical resource. This
    /// path does not gate on the peer's circuit breaker and does not go
    /// through the fan-out manager — it is a low-frequency administrative
    /// action, not ordinary delivery traffic.
    pub async fn resume(&self, target: &str, subtarget: Option<&str>, baseline: Value) -> ResumeOutcome {
        let key = Self::suspension_key(target, subtarget);
        if !self.store.delete_attr(&self.actor_id, SUSPENSIONS_BUCKET, &key).await {
            return ResumeOutcome::default();
        }

        let subs = self.matching_subscriptions(target, subtarget).await;
        let mut affected = 0;
        for sub in &subs {
            if self.send_resume_callback(sub, target, subtarget, &baseline).await {
                affected += 1;
            }
        }
        ResumeOutcome { affected }
    }

    async fn send_resume_callback(&self, sub: &Subscription, target: &str, subtarget: Option<&str>, baseline: &Value) -> bool {
        let Some(trust) = self.trust.get_trust(&self.actor_id, &sub.peer_id).await else { return false };
        if !trust.is_usable_for_calls() {
            return false;
        }
        let supports_resync = trust
            .aw_supported
            .split(',')
            .map(str::trim)
            .any(|tag| tag == option_tags::SUBSCRIPTION_RESYNC);

        let envelope = if supports_resync {
            CallbackEnvelope {
                id: self.actor_id.clone(),
                target: target.to_string(),
                subtarget: subtarget.map(str::to_string),
                sequence: sub.sequence,
                timestamp: Utc::now(),
                granularity: Granularity::High,
                subscriptionid: sub.subscription_id.clone(),
                kind: Some("resync".to_string()),
                data: Some(baseline.clone()),
                url: None,
            }
        } else {
            CallbackEnvelope {
                id: self.actor_id.clone(),
                target: target.to_string(),
                subtarget: subtarget.map(str::to_string),
                sequence: sub.sequence,
                timestamp: Utc::now(),
                granularity: Granularity::Low,
                subscriptionid: sub.subscription_id.clone(),
                kind: None,
                data: None,
                url: Some(format!("{}/{}/{}", self.proto_fqdn.trim_end_matches('/'), self.actor_id, target)),
            }
        };

        let Ok(body) = serde_json::to_vec(&envelope) else { return false };
        self.client
            .post(sub.callback_url.as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", trust.secret))
            .body(body)
            .send()
            .await
            .is_ok()
    }
}
