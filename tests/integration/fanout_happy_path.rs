//! End-to-end: a trust relationship, a high-granularity subscription, a
//! mutation, and the delivered diff landing at the subscriber and advancing
//! `sequence`.

use std::net::SocketAddr;
use std::sync::Arc;

use aw_test_support::MockPeer;
use serde_json::{json, Value};

async fn spawn_gateway(actor_id: &str) -> (SocketAddr, Arc<actor_gateway::AppState>) {
    let toml = format!("[actor]\nid = \"{actor_id}\"\nproto_fqdn = \"https://{actor_id}.example.com\"\n");
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
async fn high_granularity_mutation_reaches_subscriber_and_advances_sequence() {
    let subscriber = MockPeer::start().await;
    subscriber.set_status_route("/callbacks/sub1", 200).await;

    let (addr, state) = spawn_gateway("publisher1").await;
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
    let secret = init["secret"].as_str().unwrap().to_string();

    let approved = client
        .put(format!("{base}/trust/friend/{peer_id}"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(approved.status(), 204);

    let sub: Value = client
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
        .unwrap()
        .json()
        .await
        .unwrap();
    let subscription_id = sub["subscription_id"].as_str().unwrap().to_string();
    assert_eq!(sub["sequence"], 0);

    let outcome = state.engine.record_mutation("properties", None, json!({"name": "updated"})).await;
    assert_eq!(outcome.updated_subscriptions.len(), 1);

    assert_eq!(subscriber.request_count("/callbacks/sub1").await, 1);

    let detail: Value = client
        .get(format!("{base}/subscriptions/{peer_id}/{subscription_id}"))
        .header("Authorization", format!("Bearer {secret}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["sequence"], 1);
    let diffs = detail["diffs"].as_array().unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0]["data"], json!({"name": "updated"}));

    let unauthorized = client.get(format!("{base}/subscriptions/{peer_id}/{subscription_id}")).send().await.unwrap();
    assert_eq!(unauthorized.status(), 401);
}
