//! A peer call that gets a 401 with Bearer auth retries once
//! with HTTP Basic (actor id / trustee passphrase) before giving up, using a
//! `TrustRecord` wired through the same `TrustStore` the gateway shares.

use aw_peer_proxy::{PeerProxy, ProxyTimeouts};
use aw_protocol::TrustRecord;
use aw_test_support::{MockPeer, ScriptedResponse};
use serde_json::json;

#[tokio::test]
async fn peer_call_falls_back_to_basic_after_a_bearer_401() {
    let peer = MockPeer::start().await;
    peer.push_sequence("/properties/foo", vec![ScriptedResponse::empty(401), ScriptedResponse::json(200, json!({"ok": true}))])
        .await;

    let toml = "[actor]\nid = \"publisher1\"\nproto_fqdn = \"https://publisher1.example.com\"\n";
    let config = actor_gateway::load_config_from_str(toml).unwrap();
    let state = actor_gateway::AppState::build(&config).await;

    let trust = TrustRecord {
        actor_id: "publisher1".to_string(),
        peer_id: "peer1".to_string(),
        baseuri: peer.base_url(),
        secret: "s3cr3t".to_string(),
        relationship: "friend".to_string(),
        approved: true,
        aw_supported: String::new(),
        aw_version: None,
        capabilities_fetched_at: None,
        established_via: "initiated".to_string(),
        last_accessed: None,
    };
    state.trust.put_trust(&trust).await;

    let proxy = PeerProxy::new(&trust, Some("trustee-pass".to_string()), ProxyTimeouts::default()).unwrap();
    let resp = proxy.get_resource("properties/foo", &[]).await.expect("response");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({"ok": true}));

    let requests = peer.requests().await;
    assert_eq!(requests.len(), 2);
    let first_auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap().to_string();
    let second_auth = requests[1].headers.get("authorization").unwrap().to_str().unwrap().to_string();
    assert!(first_auth.starts_with("Bearer "));
    assert!(second_auth.starts_with("Basic "));
}

#[tokio::test]
async fn peer_call_never_retries_without_a_trustee_passphrase() {
    let peer = MockPeer::start().await;
    peer.set_status_route("/properties/foo", 401).await;

    let trust = TrustRecord {
        actor_id: "publisher1".to_string(),
        peer_id: "peer1".to_string(),
        baseuri: peer.base_url(),
        secret: "s3cr3t".to_string(),
        relationship: "friend".to_string(),
        approved: true,
        aw_supported: String::new(),
        aw_version: None,
        capabilities_fetched_at: None,
        established_via: "initiated".to_string(),
        last_accessed: None,
    };

    let proxy = PeerProxy::new(&trust, None, ProxyTimeouts::default()).unwrap();
    let resp = proxy.get_resource("properties/foo", &[]).await.expect("response");
    assert_eq!(resp.status, 401);
    assert_eq!(peer.request_count("/properties/foo").await, 1);
}
