//! Bearer-token authentication for peer-facing endpoints. Checked against
//! the secret this actor's own trust record holds for that peer.

use axum::http::HeaderMap;

use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// True iff `headers` carries a Bearer token matching the trust secret this
/// actor holds for `peer_id`.
pub async fn authorize_peer(state: &AppState, peer_id: &str, headers: &HeaderMap) -> bool {
    let Some(token) = bearer_token(headers) else { return false };
    let Some(trust) = state.trust.get_trust(&state.actor_id, peer_id).await else {
        return false;
    };
    trust.approved && token == trust.secret
}
