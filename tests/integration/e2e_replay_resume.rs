use std::sync::Arc;

use nostrmq::{Config, NostrMq, ReceiveRequest, SendRequest};
use nostrmq_test_support::MockRelayServer;

#[tokio::test]
async fn replay_resume_persists_watermark_across_subscriptions() {
    let server = MockRelayServer::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let secret = "2".repeat(64);
    let cache_dir = dir.path().to_string_lossy().into_owned();

    let make_config = || {
        let mut config = Config::new(secret.clone(), vec![server.ws_url()]).unwrap();
        config.tracking.cache_dir = cache_dir.clone();
        config.tracking.track_limit = 10;
        config
    };

    let target = make_config().pubkey;

    {
        let client = NostrMq::new(make_config());
        let on_message: nostrmq::OnMessage = Arc::new(|_, _, _| Ok(()));
        let handle = client.receive(ReceiveRequest::new(on_message)).await.unwrap();
        client.send(SendRequest::new(target.clone(), serde_json::json!({"n": 1}))).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle.recv()).await.unwrap();
        handle.close().await;
        client.close().await;
    }

    let timestamp_path = dir.path().join("timestamp.json");
    let contents = tokio::fs::read_to_string(&timestamp_path).await.expect("timestamp.json persisted");
    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert!(parsed["lastProcessed"].as_i64().unwrap() > 0);

    // A second client pointed at the same cache dir picks up the persisted
    // watermark instead of falling back to the lookback default; we can't
    // observe `subscription_since()` directly from outside the crate, but
    // construction must succeed and leave the file untouched in content.
    let client2 = NostrMq::new(make_config());
    let on_message2: nostrmq::OnMessage = Arc::new(|_, _, _| Ok(()));
    let handle2 = client2.receive(ReceiveRequest::new(on_message2)).await.unwrap();
    handle2.close().await;
    client2.close().await;

    let contents_after = tokio::fs::read_to_string(&timestamp_path).await.unwrap();
    let parsed_after: serde_json::Value = serde_json::from_str(&contents_after).unwrap();
    assert_eq!(parsed_after["lastProcessed"], parsed["lastProcessed"]);
}
