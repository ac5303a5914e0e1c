use std::sync::{Arc, Mutex};

use nostrmq::{Config, NostrMq, ReceiveRequest, SendRequest};
use nostrmq_test_support::MockRelayServer;

#[tokio::test]
async fn self_loop_delivers_exactly_once() {
    let server = MockRelayServer::start().await.unwrap();
    let mut config = Config::new("1".repeat(64), vec![server.ws_url()]).unwrap();
    config.tracking.enable_persistence = false;
    let target = config.pubkey.clone();
    let client = NostrMq::new(config);

    let received: Arc<Mutex<Vec<(serde_json::Value, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let on_message: nostrmq::OnMessage = Arc::new(move |payload, sender, _event| {
        received_clone.lock().unwrap().push((payload.clone(), sender.to_owned()));
        Ok(())
    });
    let handle = client.receive(ReceiveRequest::new(on_message)).await.unwrap();

    let id = client.send(SendRequest::new(target.clone(), serde_json::json!({"n": 1}))).await.unwrap();
    assert_eq!(id.len(), 64);

    let delivered = tokio::time::timeout(std::time::Duration::from_secs(2), handle.recv())
        .await
        .expect("message delivered within timeout")
        .expect("subscription did not close early");
    assert_eq!(delivered.payload, serde_json::json!({"n": 1}));
    assert_eq!(delivered.sender, target);

    handle.close().await;
    client.close().await;

    assert_eq!(received.lock().unwrap().len(), 1);
}
