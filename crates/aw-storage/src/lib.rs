//! The bucketed attribute store interface the core consumes.
//!
//! Values are opaque `serde_json::Value` blobs to the store; only the core
//! knows their shape. Production backends (a real KV/table store) are an
//! external collaborator — this crate only defines the trait plus an
//! in-memory reference implementation used by tests and the illustrative
//! gateway service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// One stored value plus whatever the store wants `data` to carry; the core
/// only ever inspects `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrValue {
    pub data: Value,
}

/// A bucketed attribute store, keyed by `(actor_id, bucket, name)`.
///
/// Implementations must provide at-least per-key atomicity of `set_attr`;
/// the core performs no additional locking of its own around calls into
/// this trait.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn get_attr(&self, actor_id: &str, bucket: &str, name: &str) -> Option<AttrValue>;
    async fn set_attr(&self, actor_id: &str, bucket: &str, name: &str, data: Value) -> bool;
    async fn delete_attr(&self, actor_id: &str, bucket: &str, name: &str) -> bool;
    async fn get_bucket(&self, actor_id: &str, bucket: &str) -> HashMap<String, AttrValue>;
}

type BucketKey = (String, String);

/// Reference in-memory implementation, for tests and the illustrative gateway.
///
/// Per-bucket maps are guarded by one `RwLock` each.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<BucketKey, HashMap<String, Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn get_attr(&self, actor_id: &str, bucket: &str, name: &str) -> Option<AttrValue> {
        let key = (actor_id.to_string(), bucket.to_string());
        let buckets = self.buckets.read().await;
        buckets
            .get(&key)
            .and_then(|b| b.get(name))
            .cloned()
            .map(|data| AttrValue { data })
    }

    async fn set_attr(&self, actor_id: &str, bucket: &str, name: &str, data: Value) -> bool {
        let key = (actor_id.to_string(), bucket.to_string());
        let mut buckets = self.buckets.write().await;
        buckets.entry(key).or_default().insert(name.to_string(), data);
        true
    }

    async fn delete_attr(&self, actor_id: &str, bucket: &str, name: &str) -> bool {
        let key = (actor_id.to_string(), bucket.to_string());
        let mut buckets = self.buckets.write().await;
        buckets.get_mut(&key).and_then(|b| b.remove(name)).is_some()
    }

    async fn get_bucket(&self, actor_id: &str, bucket: &str) -> HashMap<String, AttrValue> {
        let key = (actor_id.to_string(), bucket.to_string());
        let buckets = self.buckets.read().await;
        buckets
            .get(&key)
            .map(|b| {
                b.iter()
                    .map(|(k, v)| (k.clone(), AttrValue { data: v.clone() }))
                    .collect()
            })
            .unwrap_or_default()
    }
}
