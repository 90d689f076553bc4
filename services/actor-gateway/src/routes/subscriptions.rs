use std::sync::Arc;

use aw_protocol::{DiffPayload, Granularity};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::authorize_peer;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub peerid: String,
    pub target: String,
    #[serde(default)]
    pub subtarget: Option<String>,
    pub granularity: Granularity,
    pub callback_url: String,
}

/// `POST /subscriptions`.
pub async fn subscribe(State(state): State<Arc<AppState>>, Json(req): Json<SubscribeRequest>) -> (StatusCode, Json<Value>) {
    let sub = state
        .engine
        .subscribe(&req.peerid, &req.target, req.subtarget, req.granularity, req.callback_url)
        .await;
    (StatusCode::CREATED, Json(serde_json::to_value(&sub).unwrap_or_else(|_| json!({}))))
}

/// `GET /subscriptions/<peer_id>`.
pub async fn list_for_peer(State(state): State<Arc<AppState>>, Path(peer_id): Path<String>) -> Json<Value> {
    let subs = state.engine.list_subscriptions_for_peer(&peer_id).await;
    Json(serde_json::to_value(&subs).unwrap_or_else(|_| json!([])))
}

/// `GET /subscriptions/<peer_id>/<sub_id>` — Bearer-authenticated.
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path((peer_id, sub_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorize_peer(&state, &peer_id, &headers).await {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"code": 401, "message": "auth_failure"}})));
    }
    let Some(sub) = state.engine.get_subscription(&peer_id, &sub_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    };
    let diffs = state.engine.list_diffs(&peer_id, &sub_id).await;
    let diffs_json: Vec<Value> = diffs
        .iter()
        .map(|d| {
            let data = match &d.payload {
                DiffPayload::Data(v) => v.clone(),
                DiffPayload::Url(u) => json!({ "url": u }),
            };
            json!({ "sequence": d.sequence, "timestamp": d.timestamp, "data": data })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "sequence": sub.sequence, "diffs": diffs_json })))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub sequence: u64,
}

/// `PUT /subscriptions/<peer_id>/<sub_id>`.
pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path((peer_id, sub_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<AcknowledgeRequest>,
) -> StatusCode {
    if !authorize_peer(&state, &peer_id, &headers).await {
        return StatusCode::UNAUTHORIZED;
    }
    if state.engine.get_subscription(&peer_id, &sub_id).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.engine.acknowledge(&peer_id, &sub_id, req.sequence).await;
    StatusCode::NO_CONTENT
}

/// `DELETE /subscriptions/<peer_id>/<sub_id>`.
pub async fn delete(State(state): State<Arc<AppState>>, Path((peer_id, sub_id)): Path<(String, String)>, headers: HeaderMap) -> StatusCode {
    if !authorize_peer(&state, &peer_id, &headers).await {
        return StatusCode::UNAUTHORIZED;
    }
    if state.engine.delete_subscription(&peer_id, &sub_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub target: String,
    #[serde(default)]
    pub subtarget: Option<String>,
}

/// `POST /subscriptions/suspend`.
pub async fn suspend(State(state): State<Arc<AppState>>, Json(req): Json<SuspendRequest>) -> StatusCode {
    state.engine.suspend(&req.target, req.subtarget.as_deref()).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub target: String,
    #[serde(default)]
    pub subtarget: Option<String>,
    pub baseline: Value,
}

/// `POST /subscriptions/resume` — the mirror of the suspend endpoint,
/// exposed the same way so suspension is reversible over HTTP.
pub async fn resume(State(state): State<Arc<AppState>>, Json(req): Json<ResumeRequest>) -> Json<Value> {
    let outcome = state.engine.resume(&req.target, req.subtarget.as_deref(), req.baseline).await;
    Json(json!({ "affected": outcome.affected }))
}
