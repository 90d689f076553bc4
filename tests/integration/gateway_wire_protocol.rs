//! Exercises the HTTP wire surface directly: meta endpoints, trust
//! lifecycle status codes, and callback envelope validation, independent of
//! any particular fan-out scenario.

use std::net::SocketAddr;
use std::sync::Arc;

use aw_protocol::TrustRecord;
use serde_json::{json, Value};

fn publisher_trust(secret: &str) -> TrustRecord {
    TrustRecord {
        actor_id: "publisher1".to_string(),
        peer_id: "other-publisher".to_string(),
        baseuri: "https://other-publisher.example.com".to_string(),
        secret: secret.to_string(),
        relationship: "friend".to_string(),
        approved: true,
        aw_supported: String::new(),
        aw_version: None,
        capabilities_fetched_at: None,
        established_via: "initiated".to_string(),
        last_accessed: None,
    }
}

async fn spawn_gateway(extra_toml: &str) -> (SocketAddr, Arc<actor_gateway::AppState>) {
    let toml = format!("[actor]\nid = \"publisher1\"\nproto_fqdn = \"https://publisher1.example.com\"\n{extra_toml}");
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
async fn meta_endpoints_report_configured_supported_tags_and_version() {
    let (addr, _state) = spawn_gateway("supported = \"subscriptionresync,subscriptionhealth\"\nversion = \"9.9.9\"\n").await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let supported = client.get(format!("{base}/meta/actingweb/supported")).send().await.unwrap().text().await.unwrap();
    assert_eq!(supported, "subscriptionresync,subscriptionhealth");

    let version = client.get(format!("{base}/meta/actingweb/version")).send().await.unwrap().text().await.unwrap();
    assert_eq!(version, "9.9.9");

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn trust_lifecycle_status_codes_and_relationship_mismatch() {
    let (addr, _state) = spawn_gateway("").await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let init: Value = client
        .post(format!("{base}/trust"))
        .json(&json!({"url": "https://peer.example.com", "relationship": "friend"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let peer_id = init["peerid"].as_str().unwrap().to_string();
    assert!(init["secret"].as_str().is_some());

    let mismatched = client
        .put(format!("{base}/trust/admin/{peer_id}"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(mismatched.status(), 404);

    let approved = client
        .put(format!("{base}/trust/friend/{peer_id}"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(approved.status(), 204);

    let missing_peer = client
        .put(format!("{base}/trust/friend/peer-does-not-exist"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_peer.status(), 404);

    let dissolved = client.delete(format!("{base}/trust/friend/{peer_id}")).send().await.unwrap();
    assert_eq!(dissolved.status(), 204);

    let dissolved_again = client.delete(format!("{base}/trust/friend/{peer_id}")).send().await.unwrap();
    assert_eq!(dissolved_again.status(), 404);
}

#[tokio::test]
async fn callback_envelope_ignores_unknown_top_level_keys() {
    let (addr, state) = spawn_gateway("").await;
    state.trust.put_trust(&publisher_trust("cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let envelope = json!({
        "id": "other-publisher",
        "target": "properties",
        "sequence": 1,
        "timestamp": "2024-01-01T00:00:00Z",
        "granularity": "high",
        "subscriptionid": "sub1",
        "data": {"x": 1},
        "unexpected_future_field": "ignored",
    });
    let resp = client
        .post(format!("{base}/callbacks/subscriptions/other-publisher/sub1"))
        .header("Authorization", "Bearer cb-secret")
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn callback_envelope_with_both_data_and_url_is_rejected() {
    let (addr, state) = spawn_gateway("").await;
    state.trust.put_trust(&publisher_trust("cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let envelope = json!({
        "id": "other-publisher",
        "target": "properties",
        "sequence": 1,
        "timestamp": "2024-01-01T00:00:00Z",
        "granularity": "high",
        "subscriptionid": "sub1",
        "data": {"x": 1},
        "url": "https://example.com/x",
    });
    let resp = client
        .post(format!("{base}/callbacks/subscriptions/other-publisher/sub1"))
        .header("Authorization", "Bearer cb-secret")
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn callback_without_a_valid_bearer_token_is_rejected() {
    let (addr, state) = spawn_gateway("").await;
    state.trust.put_trust(&publisher_trust("cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let envelope = json!({
        "id": "other-publisher",
        "target": "properties",
        "sequence": 1,
        "timestamp": "2024-01-01T00:00:00Z",
        "granularity": "high",
        "subscriptionid": "sub1",
        "data": {"x": 1},
    });

    let missing_header = client
        .post(format!("{base}/callbacks/subscriptions/other-publisher/sub1"))
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(missing_header.status(), 401);

    let wrong_token = client
        .post(format!("{base}/callbacks/subscriptions/other-publisher/sub1"))
        .header("Authorization", "Bearer wrong-secret")
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_token.status(), 401);
}

#[tokio::test]
async fn subscription_read_requires_a_valid_bearer_token() {
    let (addr, state) = spawn_gateway("").await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let init: Value = client
        .post(format!("{base}/trust"))
        .json(&json!({"url": "https://peer.example.com", "relationship": "friend"}))
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

    let sub = state
        .engine
        .subscribe(&peer_id, "properties", None, aw_protocol::Granularity::High, "https://peer.example.com/callbacks/sub1".to_string())
        .await;

    let missing_header = client.get(format!("{base}/subscriptions/{peer_id}/{}", sub.subscription_id)).send().await.unwrap();
    assert_eq!(missing_header.status(), 401);

    let wrong_token = client
        .get(format!("{base}/subscriptions/{peer_id}/{}", sub.subscription_id))
        .header("Authorization", "Bearer wrong-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_token.status(), 401);

    let right_token = client
        .get(format!("{base}/subscriptions/{peer_id}/{}", sub.subscription_id))
        .header("Authorization", format!("Bearer {}", init["secret"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(right_token.status(), 200);
}
