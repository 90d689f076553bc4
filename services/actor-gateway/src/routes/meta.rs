use std::sync::Arc;

use axum::extract::State;

use crate::state::AppState;

/// `GET /meta/actingweb/supported` — comma-separated option tags.
pub async fn supported(State(state): State<Arc<AppState>>) -> String {
    state.supported.clone()
}

/// `GET /meta/actingweb/version` — version string.
pub async fn version(State(state): State<Arc<AppState>>) -> String {
    state.version.clone()
}
