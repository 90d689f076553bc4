//! A payload larger than `max_payload_for_high_granularity`
//! downgrades a high-granularity subscription's delivery to a low-granularity
//! envelope carrying a resource `url` instead of inline `data`.

use std::net::SocketAddr;
use std::sync::Arc;

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
async fn oversized_payload_downgrades_to_low_granularity_with_resource_url() {
    let subscriber = MockPeer::start().await;
    subscriber.set_status_route("/callbacks/sub1", 200).await;

    let (addr, state) = spawn_gateway("publisher1", "[fanout]\nmax_payload_for_high_granularity = 4\n").await;
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

    state
        .engine
        .record_mutation("properties", None, json!({"description": "well over four bytes of JSON"}))
        .await;

    let requests = subscriber.requests().await;
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["granularity"], "low");
    assert!(body.get("data").is_none());
    assert_eq!(body["url"], "https://publisher1.example.com/publisher1/properties");
}
