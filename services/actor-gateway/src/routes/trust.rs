use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use aw_protocol::TrustRecord;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiateTrustRequest {
    pub url: String,
    pub relationship: String,
}

/// `POST /trust` — initiates an unapproved trust relationship toward `url`.
/// The peer id and shared secret are minted here; a real handshake with the
/// peer (fetching its own trust confirmation) is out of scope for the
/// illustrative gateway.
pub async fn initiate(State(state): State<Arc<AppState>>, Json(req): Json<InitiateTrustRequest>) -> (StatusCode, Json<Value>) {
    let peer_id = format!("peer-{}", uuid::Uuid::new_v4());
    let trust = TrustRecord {
        actor_id: state.actor_id.clone(),
        peer_id: peer_id.clone(),
        baseuri: req.url,
        secret: uuid::Uuid::new_v4().to_string(),
        relationship: req.relationship,
        approved: false,
        aw_supported: String::new(),
        aw_version: None,
        capabilities_fetched_at: None,
        established_via: "initiated".to_string(),
        last_accessed: None,
    };
    state.trust.put_trust(&trust).await;
    (StatusCode::CREATED, Json(json!({"peerid": peer_id, "secret": trust.secret})))
}

#[derive(Debug, Deserialize)]
pub struct ApproveTrustRequest {
    pub approved: bool,
}

/// `PUT /trust/<rel>/<peer_id>`.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path((relationship, peer_id)): Path<(String, String)>,
    Json(req): Json<ApproveTrustRequest>,
) -> StatusCode {
    match state.trust.get_trust(&state.actor_id, &peer_id).await {
        Some(trust) if trust.relationship == relationship => {
            state.trust.set_approved(&state.actor_id, &peer_id, req.approved).await;
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::NOT_FOUND,
    }
}

/// `DELETE /trust/<rel>/<peer_id>` — dissolves the relationship and cascades
/// subscription cleanup.
pub async fn dissolve(State(state): State<Arc<AppState>>, Path((relationship, peer_id)): Path<(String, String)>) -> StatusCode {
    match state.trust.get_trust(&state.actor_id, &peer_id).await {
        Some(trust) if trust.relationship == relationship => {
            state.trust.delete_trust(&state.actor_id, &peer_id).await;
            state.engine.cascade_trust_deletion(&peer_id).await;
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::NOT_FOUND,
    }
}
