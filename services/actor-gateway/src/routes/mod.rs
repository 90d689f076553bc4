mod callbacks;
mod meta;
mod subscriptions;
mod trust;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full HTTP surface for one actor using the usual
/// `Router::new().route(...)` / `State<Arc<AppState>>` wiring style.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/meta/actingweb/supported", get(meta::supported))
        .route("/meta/actingweb/version", get(meta::version))
        .route("/trust", post(trust::initiate))
        .route("/trust/{relationship}/{peer_id}", axum::routing::put(trust::approve).delete(trust::dissolve))
        .route("/subscriptions", post(subscriptions::subscribe))
        .route("/subscriptions/suspend", post(subscriptions::suspend))
        .route("/subscriptions/resume", post(subscriptions::resume))
        .route("/subscriptions/{peer_id}", get(subscriptions::list_for_peer))
        .route(
            "/subscriptions/{peer_id}/{sub_id}",
            get(subscriptions::read).put(subscriptions::acknowledge).delete(subscriptions::delete),
        )
        .route("/callbacks/subscriptions/{publisher_id}/{sub_id}", post(callbacks::receive))
        .route("/callbacks/subscriptions/{publisher_id}/{sub_id}/health", get(callbacks::health))
        .route("/callbacks/subscriptions/{publisher_id}/{sub_id}/stats", get(callbacks::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
