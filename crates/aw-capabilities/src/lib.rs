//! Peer-capability discovery and caching, plus a methods/actions cache kept
//! separate from it as a lower-traffic companion (see [`methods`]).

use std::collections::HashSet;

use aw_protocol::TrustRecord;
use aw_storage::AttributeStore;
use aw_trust::TrustStore;
use chrono::{DateTime, Duration, Utc};

const CAPABILITIES_TTL_HOURS: i64 = 24;

/// Lazily-fetched, TTL-bounded view of one peer's advertised protocol
/// options. Reads and refreshes route through the actor's [`TrustStore`];
/// a `PeerCapabilities` value itself caches nothing across calls beyond one
/// `ensure_loaded`.
pub struct PeerCapabilities<'a> {
    trust: &'a TrustStore,
    client: reqwest::Client,
    actor_id: String,
    peer_id: String,
}

impl<'a> PeerCapabilities<'a> {
    #[must_use]
    pub fn new(trust: &'a TrustStore, client: reqwest::Client, actor_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            trust,
            client,
            actor_id: actor_id.into(),
            peer_id: peer_id.into(),
        }
    }

    async fn trust_record(&self) -> Option<TrustRecord> {
        self.trust.get_trust(&self.actor_id, &self.peer_id).await
    }

    fn is_cache_valid(record: &TrustRecord) -> bool {
        let Some(fetched_at) = record.capabilities_fetched_at else {
            return false;
        };
        Utc::now() - fetched_at < Duration::hours(CAPABILITIES_TTL_HOURS)
    }

    fn parse_supported(aw_supported: &str) -> HashSet<String> {
        aw_supported
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Fetches from the peer if the cache is missing or stale; otherwise a no-op.
    pub async fn ensure_loaded(&self) -> bool {
        match self.trust_record().await {
            Some(record) if Self::is_cache_valid(&record) => true,
            _ => self.refresh().await,
        }
    }

    /// Re-fetches `<baseuri>/meta/actingweb/supported` (required) and
    /// `<baseuri>/meta/actingweb/version` (best-effort), then updates the
    /// trust record. Never errors outward: a network/HTTP failure just
    /// leaves the cache as it was, and every predicate reads `false` until
    /// the next attempt succeeds.
    pub async fn refresh(&self) -> bool {
        let Some(record) = self.trust_record().await else {
            tracing::warn!(peer_id = %self.peer_id, "cannot refresh capabilities: no trust record");
            return false;
        };
        if record.baseuri.is_empty() {
            tracing::warn!(peer_id = %self.peer_id, "cannot refresh capabilities: no baseuri");
            return false;
        }

        let supported_url = format!("{}/meta/actingweb/supported", record.baseuri.trim_end_matches('/'));
        let response = match self.client.get(supported_url.as_str()).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(peer_id = %self.peer_id, status = %resp.status(), "failed to fetch capabilities");
                return false;
            }
            Err(err) => {
                tracing::warn!(peer_id = %self.peer_id, error = %err, "network error fetching capabilities");
                return false;
            }
        };
        let supported = match response.text().await {
            Ok(body) => body.trim().to_string(),
            Err(_) => return false,
        };

        let version_url = format!("{}/meta/actingweb/version", record.baseuri.trim_end_matches('/'));
        let version = match self.client.get(version_url.as_str()).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok().map(|s| s.trim().to_string()),
            _ => None,
        };

        self.trust
            .update_capabilities(&self.actor_id, &self.peer_id, supported, version, Utc::now())
            .await
    }

    pub async fn supports(&self, option: &str) -> bool {
        self.ensure_loaded().await;
        self.trust_record()
            .await
            .is_some_and(|record| Self::parse_supported(&record.aw_supported).contains(option))
    }

    pub async fn supports_batch_subscriptions(&self) -> bool {
        self.supports(aw_protocol::option_tags::SUBSCRIPTION_BATCH).await
    }

    pub async fn supports_compression(&self) -> bool {
        self.supports(aw_protocol::option_tags::CALLBACK_COMPRESSION).await
    }

    pub async fn supports_health_endpoint(&self) -> bool {
        self.supports(aw_protocol::option_tags::SUBSCRIPTION_HEALTH).await
    }

    pub async fn supports_resync_callbacks(&self) -> bool {
        self.supports(aw_protocol::option_tags::SUBSCRIPTION_RESYNC).await
    }

    pub async fn supports_stats_endpoint(&self) -> bool {
        self.supports(aw_protocol::option_tags::SUBSCRIPTION_STATS).await
    }

    pub async fn get_version(&self) -> Option<String> {
        self.ensure_loaded().await;
        self.trust_record().await.and_then(|record| record.aw_version)
    }

    pub async fn get_all_supported(&self) -> HashSet<String> {
        self.ensure_loaded().await;
        self.trust_record()
            .await
            .map(|record| Self::parse_supported(&record.aw_supported))
            .unwrap_or_default()
    }
}

/// The separate methods/actions cache the original source keeps alongside
/// protocol-option capabilities: a peer's `GET /methods` and `GET /actions`
/// responses, stored under their own bucket rather than on the trust
/// record, with their own TTL.
pub mod methods {
    use super::{AttributeStore, DateTime, Duration, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    const METHODS_CACHE_BUCKET: &str = "peer_capabilities";
    const METHODS_TTL_HOURS: i64 = 24;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CachedMethods {
        methods: Vec<String>,
        actions: Vec<String>,
        fetched_at: DateTime<Utc>,
    }

    /// Caches a peer's exposed RPC method and action names.
    pub struct MethodsCache {
        store: Arc<dyn AttributeStore>,
        client: reqwest::Client,
    }

    impl MethodsCache {
        #[must_use]
        pub fn new(store: Arc<dyn AttributeStore>, client: reqwest::Client) -> Self {
            Self { store, client }
        }

        fn key(peer_id: &str) -> String {
            format!("methods:{peer_id}")
        }

        async fn cached(&self, actor_id: &str, peer_id: &str) -> Option<CachedMethods> {
            let attr = self.store.get_attr(actor_id, METHODS_CACHE_BUCKET, &Self::key(peer_id)).await?;
            serde_json::from_value(attr.data).ok()
        }

        fn is_valid(cached: &CachedMethods) -> bool {
            Utc::now() - cached.fetched_at < Duration::hours(METHODS_TTL_HOURS)
        }

        /// Returns the peer's exposed method names, fetching and caching on
        /// a stale/missing cache.
        pub async fn methods(&self, actor_id: &str, peer_id: &str, baseuri: &str) -> Vec<String> {
            self.ensure_loaded(actor_id, peer_id, baseuri).await;
            self.cached(actor_id, peer_id).await.map(|c| c.methods).unwrap_or_default()
        }

        /// Returns the peer's exposed state-modifying action names.
        pub async fn actions(&self, actor_id: &str, peer_id: &str, baseuri: &str) -> Vec<String> {
            self.ensure_loaded(actor_id, peer_id, baseuri).await;
            self.cached(actor_id, peer_id).await.map(|c| c.actions).unwrap_or_default()
        }

        async fn ensure_loaded(&self, actor_id: &str, peer_id: &str, baseuri: &str) {
            if let Some(cached) = self.cached(actor_id, peer_id).await {
                if Self::is_valid(&cached) {
                    return;
                }
            }
            self.refresh(actor_id, peer_id, baseuri).await;
        }

        pub async fn refresh(&self, actor_id: &str, peer_id: &str, baseuri: &str) -> bool {
            let base = baseuri.trim_end_matches('/');
            let methods = self.fetch_list(&format!("{base}/methods")).await.unwrap_or_default();
            let actions = self.fetch_list(&format!("{base}/actions")).await.unwrap_or_default();

            let entry = CachedMethods {
                methods,
                actions,
                fetched_at: Utc::now(),
            };
            let Ok(value) = serde_json::to_value(&entry) else {
                return false;
            };
            self.store.set_attr(actor_id, METHODS_CACHE_BUCKET, &Self::key(peer_id), value).await
        }

        async fn fetch_list(&self, url: &str) -> Option<Vec<String>> {
            let response = self.client.get(url).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            response.json::<Vec<String>>().await.ok()
        }
    }

}
