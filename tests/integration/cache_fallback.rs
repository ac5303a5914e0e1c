use std::sync::{Arc, Mutex};

use nostrmq::{Config, NostrMq, ReceiveRequest, SendRequest};
use nostrmq_test_support::MockRelayServer;

#[tokio::test]
async fn cache_fallback_allows_memory_only_tracking() {
    let server = MockRelayServer::start().await.unwrap();
    let file_not_dir = tempfile::NamedTempFile::new().unwrap();
    let mut config = Config::new("6".repeat(64), vec![server.ws_url()]).unwrap();
    config.tracking.cache_dir = file_not_dir.path().to_string_lossy().into_owned();
    let target = config.pubkey.clone();
    let client = NostrMq::new(config);

    let received = Arc::new(Mutex::new(false));
    let received_clone = Arc::clone(&received);
    let on_message: nostrmq::OnMessage = Arc::new(move |_, _, _| {
        *received_clone.lock().unwrap() = true;
        Ok(())
    });
    let handle = client.receive(ReceiveRequest::new(on_message)).await.unwrap();

    client.send(SendRequest::new(target, serde_json::json!({"n": 1}))).await.unwrap();

    let delivered = tokio::time::timeout(std::time::Duration::from_secs(2), handle.recv()).await.unwrap();
    assert!(delivered.is_some(), "message still delivered when the cache dir can't be created");

    handle.close().await;
    client.close().await;
}
