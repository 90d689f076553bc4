//! Applying a received diff to local state is left to the caller; list-
//! operation unpacking and mirror application are out of scope here. This
//! is the gateway's reference `CallbackHooks` impl, which just logs.

use async_trait::async_trait;
use aw_subscriptions::CallbackHooks;
use serde_json::Value;

pub struct LoggingHooks;

#[async_trait]
impl CallbackHooks for LoggingHooks {
    async fn on_diff(
        &self,
        publisher_id: &str,
        subscription_id: &str,
        target: &str,
        subtarget: Option<&str>,
        sequence: u64,
        payload: &Value,
    ) {
        tracing::info!(
            publisher_id,
            subscription_id,
            target,
            subtarget,
            sequence,
            %payload,
            "applied subscription diff"
        );
    }

    async fn on_resync(
        &self,
        publisher_id: &str,
        subscription_id: &str,
        target: &str,
        subtarget: Option<&str>,
        sequence: u64,
        baseline: &Value,
    ) {
        tracing::info!(
            publisher_id,
            subscription_id,
            target,
            subtarget,
            sequence,
            %baseline,
            "applied subscription resync"
        );
    }
}
