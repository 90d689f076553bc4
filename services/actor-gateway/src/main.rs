// actor-gateway: binds the trust/capability/fan-out/subscription crates to an HTTP surface for one actor.

use std::path::Path;

use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("ACTINGWEB_GATEWAY_CONFIG").unwrap_or_else(|_| "/etc/actingweb/gateway.toml".to_string());
    let config = match actor_gateway::load_config_from_path(Path::new(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    info!(actor_id = %config.actor.id, bind = %config.http.bind, "actor-gateway starting");

    let state = actor_gateway::AppState::build(&config).await;
    let app = actor_gateway::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.http.bind));
    axum::serve(listener, app).await.expect("gateway server exited");
}
