use nostrmq::{Config, NostrMq, SendRequest};
use nostrmq_test_support::MockRelayServer;

#[tokio::test]
async fn one_of_n_publish_succeeds_with_single_acceptor() {
    let good = MockRelayServer::start().await.unwrap();
    let bad1 = MockRelayServer::start().await.unwrap();
    let bad2 = MockRelayServer::start().await.unwrap();
    bad1.close_on_event();
    bad2.close_on_event();

    let mut config = Config::new("5".repeat(64), vec![good.ws_url(), bad1.ws_url(), bad2.ws_url()]).unwrap();
    config.tracking.enable_persistence = false;
    let target = config.pubkey.clone();
    let client = NostrMq::new(config);

    let id = client.send(SendRequest::new(target, serde_json::json!({"ok": true}))).await.unwrap();
    assert_eq!(id.len(), 64);

    client.close().await;
}
