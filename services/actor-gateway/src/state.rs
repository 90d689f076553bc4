use std::sync::Arc;
use std::time::Duration;

use aw_fanout::{FanOutConfig, FanOutManager};
use aw_storage::{AttributeStore, MemoryStore};
use aw_subscriptions::{CallbackProcessor, CallbackProcessorConfig, SubscriptionEngine, SubscriptionEngineConfig};
use aw_trust::TrustStore;

use crate::config::GatewayConfig;

/// Everything a request handler needs, shared behind one `Arc`.
pub struct AppState {
    pub actor_id: String,
    pub proto_fqdn: String,
    pub supported: String,
    pub version: String,
    pub store: Arc<dyn AttributeStore>,
    pub trust: TrustStore,
    pub fanout: Arc<FanOutManager>,
    pub engine: SubscriptionEngine,
    pub processor: CallbackProcessor,
}

impl AppState {
    /// Wires storage, trust, fan-out, subscription publishing, and callback
    /// processing for one actor. The gateway's own [`AttributeStore`] is the
    /// in-memory reference implementation, since a production backend is
    /// out of scope here.
    pub async fn build(config: &GatewayConfig) -> Arc<Self> {
        let store: Arc<dyn AttributeStore> = MemoryStore::new();
        let trust = TrustStore::new(store.clone());

        let fanout_config = FanOutConfig {
            max_concurrent: config.fanout.max_concurrent,
            max_payload_for_high_granularity: config.fanout.max_payload_for_high_granularity,
            circuit_breaker_threshold: config.fanout.circuit_breaker_threshold,
            circuit_breaker_cooldown_seconds: config.fanout.circuit_breaker_cooldown_seconds,
            request_timeout: Duration::from_secs(config.fanout.request_timeout_seconds),
            enable_compression: config.fanout.enable_compression,
            persist_circuit_breakers: config.fanout.persist_circuit_breakers,
        };
        let fanout = Arc::new(FanOutManager::new(config.actor.id.clone(), config.actor.proto_fqdn.clone(), store.clone(), fanout_config).await);

        let engine = SubscriptionEngine::new(
            config.actor.id.clone(),
            config.actor.proto_fqdn.clone(),
            store.clone(),
            fanout.clone(),
            SubscriptionEngineConfig {
                sync_subscription_callbacks: config.subscriptions.sync_subscription_callbacks,
            },
        );

        let processor = CallbackProcessor::new(
            config.actor.id.clone(),
            store.clone(),
            CallbackProcessorConfig {
                pending_queue_bound: config.subscriptions.pending_queue_bound,
            },
        );

        Arc::new(Self {
            actor_id: config.actor.id.clone(),
            proto_fqdn: config.actor.proto_fqdn.clone(),
            supported: config.actor.supported.clone(),
            version: config.actor.version.clone(),
            store,
            trust,
            fanout,
            engine,
            processor,
        })
    }
}
