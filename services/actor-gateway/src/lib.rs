//! The illustrative HTTP gateway wiring the `aw-*` component crates to an
//! HTTP wire protocol: one actor per running instance.

pub mod auth;
pub mod config;
pub mod hooks;
pub mod routes;
pub mod state;

pub use config::{load_config, load_config_from_path, load_config_from_str, ConfigError, GatewayConfig};
pub use state::AppState;

use std::sync::Arc;

use axum::Router;

#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    routes::router(state)
}
