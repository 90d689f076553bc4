//! Repeated delivery failures to one peer open that peer's
//! circuit breaker, after which further mutations stop attempting delivery
//! to it entirely (counted as `circuit_open`, not `failed`).

use std::net::SocketAddr;
use std::sync::Arc;

use aw_protocol::CircuitState;
use aw_subscriptions::DispatchOutcome;
use aw_test_support::MockPeer;
use serde_json::{json, Value};

async fn spawn_gateway(actor_id: &str, extra_toml: &str) -> (SocketAddr, Arc<actor_gateway::AppState>) {
    let toml = format!("[actor]\nid = \"{actor_id}\"\nproto_fqdn = \"https://{actor_id}.example.com\"\n{extra_toml}");
    let config = actor_gateway::load_config_from_str(&toml).expect("valid config");
    let state = actor_gateway::AppState::build(&config).await;
    let app = actor_gateway::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("gateway server");
    });
    (addr, state)
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_and_suppress_further_attempts() {
    let subscriber = MockPeer::start().await;
    subscriber.set_status_route("/callbacks/sub1", 500).await;

    let (addr, state) = spawn_gateway(
        "publisher1",
        "[fanout]\ncircuit_breaker_threshold = 2\ncircuit_breaker_cooldown_seconds = 3600\n",
    )
    .await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let init: Value = client
        .post(format!("{base}/trust"))
        .json(&json!({"url": subscriber.base_url(), "relationship": "friend"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let peer_id = init["peerid"].as_str().unwrap().to_string();
    client
        .put(format!("{base}/trust/friend/{peer_id}"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();

    client
        .post(format!("{base}/subscriptions"))
        .json(&json!({
            "peerid": peer_id,
            "target": "properties",
            "subtarget": null,
            "granularity": "high",
            "callback_url": format!("{}/callbacks/sub1", subscriber.base_url()),
        }))
        .send()
        .await
        .unwrap();

    for _ in 0..2 {
        let outcome = state.engine.record_mutation("properties", None, json!({"tick": true})).await;
        match outcome.dispatch {
            DispatchOutcome::Immediate(result) => assert_eq!(result.failed, 1),
            other => panic!("expected immediate dispatch, got {other:?}"),
        }
    }
    assert_eq!(subscriber.request_count("/callbacks/sub1").await, 2);

    let outcome = state.engine.record_mutation("properties", None, json!({"tick": true})).await;
    match outcome.dispatch {
        DispatchOutcome::Immediate(result) => assert_eq!(result.circuit_open, 1),
        other => panic!("expected immediate dispatch, got {other:?}"),
    }
    assert_eq!(subscriber.request_count("/callbacks/sub1").await, 2);

    let status = state.fanout.circuit_breaker_status().await;
    assert_eq!(status.get(&peer_id).map(|r| r.state), Some(CircuitState::Open));

    state.fanout.reset_circuit_breaker(&peer_id).await;
    let status = state.fanout.circuit_breaker_status().await;
    assert_eq!(status.get(&peer_id).map(|r| r.state), Some(CircuitState::Closed));
}
