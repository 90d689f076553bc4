//! Suspending a target holds delivery, and resuming it sends a
//! resync — inline when the peer advertises `subscriptionresync`, otherwise
//! a low-granularity pointer at the canonical resource.

use std::net::SocketAddr;
use std::sync::Arc;

use aw_capabilities::PeerCapabilities;
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
async fn suspend_holds_mutations_and_resume_sends_inline_resync() {
    let subscriber = MockPeer::start().await;
    subscriber.set_status_route("/callbacks/sub1", 200).await;
    subscriber.set_text_route("/meta/actingweb/supported", "subscriptionresync").await;

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
    client
        .put(format!("{base}/trust/friend/{peer_id}"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();

    PeerCapabilities::new(&state.trust, reqwest::Client::new(), "publisher1", &peer_id)
        .refresh()
        .await;

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

    let suspended = client.post(format!("{base}/subscriptions/suspend")).json(&json!({"target": "properties"})).send().await.unwrap();
    assert_eq!(suspended.status(), 204);

    state.engine.record_mutation("properties", None, json!({"tick": 1})).await;
    assert!(subscriber.requests().await.iter().all(|r| r.path != "/callbacks/sub1"));

    let resumed: Value = client
        .post(format!("{base}/subscriptions/resume"))
        .json(&json!({"target": "properties", "baseline": {"full": "state"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resumed["affected"], 1);

    let requests = subscriber.requests().await;
    let resync_req = requests.iter().find(|r| r.path == "/callbacks/sub1").expect("resync callback delivered");
    let body: Value = serde_json::from_slice(&resync_req.body).unwrap();
    assert_eq!(body["type"], "resync");
    assert_eq!(body["data"], json!({"full": "state"}));
    assert!(body.get("url").is_none());
}

#[tokio::test]
async fn resume_without_a_prior_suspension_is_a_no_op() {
    let (addr, state) = spawn_gateway("publisher1").await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let resumed: Value = client
        .post(format!("{base}/subscriptions/resume"))
        .json(&json!({"target": "properties", "baseline": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resumed["affected"], 0);
    let _ = &state;
}
