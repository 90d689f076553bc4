use std::sync::Arc;

use aw_protocol::CallbackEnvelope;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::authorize_peer;
use crate::hooks::LoggingHooks;
use crate::state::AppState;

/// `POST /callbacks/subscriptions/<publisher_id>/<sub_id>` — Bearer-
/// authenticated against the publisher's trust secret toward this
/// subscriber; the status code is otherwise driven entirely by
/// [`ProcessOutcome::status_code`].
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path((publisher_id, _sub_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(envelope): Json<CallbackEnvelope>,
) -> StatusCode {
    if !authorize_peer(&state, &publisher_id, &headers).await {
        return StatusCode::UNAUTHORIZED;
    }
    let outcome = state.processor.process(&publisher_id, envelope, &LoggingHooks).await;
    StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `GET .../health` — Bearer-authenticated sequencing/liveness snapshot for
/// one subscription.
pub async fn health(
    State(state): State<Arc<AppState>>,
    Path((publisher_id, sub_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorize_peer(&state, &publisher_id, &headers).await {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"code": 401, "message": "auth_failure"}})));
    }
    let health = state.processor.health_snapshot(&publisher_id, &sub_id).await;
    (StatusCode::OK, Json(serde_json::to_value(&health).unwrap_or_else(|_| json!({}))))
}

/// `GET .../stats` — Bearer-authenticated processed/gapped/duplicate
/// counters for one subscription.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path((publisher_id, sub_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorize_peer(&state, &publisher_id, &headers).await {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"code": 401, "message": "auth_failure"}})));
    }
    let stats = state.processor.stats_snapshot(&publisher_id, &sub_id).await;
    (StatusCode::OK, Json(serde_json::to_value(&stats).unwrap_or_else(|_| json!({}))))
}
