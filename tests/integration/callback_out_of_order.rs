//! Callback envelopes arriving out of sequence are queued, and
//! draining on the gap-filling envelope restores in-order delivery.

use std::net::SocketAddr;
use std::sync::Arc;

use aw_protocol::TrustRecord;
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

fn publisher_trust(subscriber_actor_id: &str, secret: &str) -> TrustRecord {
    TrustRecord {
        actor_id: subscriber_actor_id.to_string(),
        peer_id: "publisher1".to_string(),
        baseuri: "https://publisher1.example.com".to_string(),
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

fn diff_envelope(sequence: u64, value: i64) -> Value {
    json!({
        "id": "publisher1",
        "target": "properties",
        "sequence": sequence,
        "timestamp": "2024-01-01T00:00:00Z",
        "granularity": "high",
        "subscriptionid": "sub1",
        "data": {"v": value},
    })
}

#[tokio::test]
async fn gap_is_queued_then_drained_once_filled() {
    let (addr, state) = spawn_gateway("subscriber1").await;
    state.trust.put_trust(&publisher_trust("subscriber1", "cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");
    let url = format!("{base}/callbacks/subscriptions/publisher1/sub1");

    let r3 = client.post(&url).header("Authorization", "Bearer cb-secret").json(&diff_envelope(3, 3)).send().await.unwrap();
    assert_eq!(r3.status(), 204);
    let r2 = client.post(&url).header("Authorization", "Bearer cb-secret").json(&diff_envelope(2, 2)).send().await.unwrap();
    assert_eq!(r2.status(), 204);
    let r1 = client.post(&url).header("Authorization", "Bearer cb-secret").json(&diff_envelope(1, 1)).send().await.unwrap();
    assert_eq!(r1.status(), 204);

    let health: Value = client
        .get(format!("{base}/callbacks/subscriptions/publisher1/sub1/health"))
        .header("Authorization", "Bearer cb-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["last_processed_sequence"], 3);
    assert_eq!(health["pending_depth"], 0);

    let stats: Value = client
        .get(format!("{base}/callbacks/subscriptions/publisher1/sub1/stats"))
        .header("Authorization", "Bearer cb-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["processed"], 1);
    assert_eq!(stats["gapped"], 2);
    assert_eq!(stats["duplicate"], 0);

    let replay = client.post(&url).header("Authorization", "Bearer cb-secret").json(&diff_envelope(2, 99)).send().await.unwrap();
    assert_eq!(replay.status(), 204);
    let stats: Value = client
        .get(format!("{base}/callbacks/subscriptions/publisher1/sub1/stats"))
        .header("Authorization", "Bearer cb-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["duplicate"], 1);
}

#[tokio::test]
async fn zero_sequence_envelope_is_rejected_as_malformed() {
    let (addr, state) = spawn_gateway("subscriber1").await;
    state.trust.put_trust(&publisher_trust("subscriber1", "cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let resp = client
        .post(format!("{base}/callbacks/subscriptions/publisher1/sub1"))
        .header("Authorization", "Bearer cb-secret")
        .json(&diff_envelope(0, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn callback_requires_a_valid_bearer_token() {
    let (addr, state) = spawn_gateway("subscriber1").await;
    state.trust.put_trust(&publisher_trust("subscriber1", "cb-secret")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");
    let url = format!("{base}/callbacks/subscriptions/publisher1/sub1");

    let missing_header = client.post(&url).json(&diff_envelope(1, 1)).send().await.unwrap();
    assert_eq!(missing_header.status(), 401);

    let wrong_token = client
        .post(&url)
        .header("Authorization", "Bearer wrong-secret")
        .json(&diff_envelope(1, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_token.status(), 401);
}
