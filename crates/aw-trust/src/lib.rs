//! Trust relationship storage, built on the [`aw_storage::AttributeStore`] interface.

use std::sync::Arc;

use aw_protocol::TrustRecord;
use aw_storage::AttributeStore;
use chrono::{DateTime, Utc};

const TRUST_BUCKET: &str = "trust";

/// Trust relationships for one actor, backed by an [`AttributeStore`].
pub struct TrustStore {
    store: Arc<dyn AttributeStore>,
}

impl TrustStore {
    #[must_use]
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self { store }
    }

    pub async fn get_trust(&self, actor_id: &str, peer_id: &str) -> Option<TrustRecord> {
        let attr = self.store.get_attr(actor_id, TRUST_BUCKET, peer_id).await?;
        serde_json::from_value(attr.data).ok()
    }

    pub async fn put_trust(&self, trust: &TrustRecord) -> bool {
        let Ok(value) = serde_json::to_value(trust) else {
            return false;
        };
        self.store
            .set_attr(&trust.actor_id, TRUST_BUCKET, &trust.peer_id, value)
            .await
    }

    pub async fn delete_trust(&self, actor_id: &str, peer_id: &str) -> bool {
        self.store.delete_attr(actor_id, TRUST_BUCKET, peer_id).await
    }

    pub async fn list_trusts(&self, actor_id: &str) -> Vec<TrustRecord> {
        self.store
            .get_bucket(actor_id, TRUST_BUCKET)
            .await
            .into_values()
            .filter_map(|v| serde_json::from_value(v.data).ok())
            .collect()
    }

    /// Update the peer-capability cache fields on an existing trust record.
    /// No-op (returns `false`) if no trust exists for the peer.
    pub async fn update_capabilities(
        &self,
        actor_id: &str,
        peer_id: &str,
        aw_supported: String,
        aw_version: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let Some(mut trust) = self.get_trust(actor_id, peer_id).await else {
            return false;
        };
        trust.aw_supported = aw_supported;
        trust.aw_version = aw_version;
        trust.capabilities_fetched_at = Some(fetched_at);
        self.put_trust(&trust).await
    }

    pub async fn set_approved(&self, actor_id: &str, peer_id: &str, approved: bool) -> bool {
        let Some(mut trust) = self.get_trust(actor_id, peer_id).await else {
            return false;
        };
        trust.approved = approved;
        self.put_trust(&trust).await
    }
}
