use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nostrmq::{Config, NostrMq, ReceiveRequest, SendRequest};
use nostrmq_test_support::MockRelayServer;

#[tokio::test]
async fn eviction_under_load_keeps_bounded_snapshot() {
    let server = MockRelayServer::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new("3".repeat(64), vec![server.ws_url()]).unwrap();
    config.tracking.cache_dir = dir.path().to_string_lossy().into_owned();
    config.tracking.track_limit = 10;
    let target = config.pubkey.clone();
    let client = NostrMq::new(config);

    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = Arc::clone(&count);
    let on_message: nostrmq::OnMessage = Arc::new(move |_, _, _| {
        count_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let handle = client.receive(ReceiveRequest::new(on_message)).await.unwrap();

    for i in 0..20 {
        client.send(SendRequest::new(target.clone(), serde_json::json!({"i": i}))).await.unwrap();
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while count.load(Ordering::SeqCst) < 20 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("all 20 events delivered within timeout");

    handle.close().await;
    client.close().await;

    let snapshot_path = dir.path().join("snapshot.json");
    let contents = tokio::fs::read_to_string(&snapshot_path).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(parsed["count"].as_u64().unwrap(), 10);
    assert_eq!(parsed["eventIds"].as_array().unwrap().len(), 10);
}
