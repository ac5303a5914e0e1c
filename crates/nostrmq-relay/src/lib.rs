mod backoff;
mod connection;
mod pool;

pub use connection::{ConnectionState, ConnectionStatus};
pub use pool::{PoolError, PoolEvent, RelayPool};

#[cfg(test)]
mod tests {
    use super::*;
    use nostrmq_protocol::{Event, Filter};
    use nostrmq_test_support::MockRelayServer;
    use std::time::Duration;

    fn sample_event(id: &str) -> Event {
        Event {
            id: id.to_owned(),
            pubkey: "a".repeat(64),
            created_at: 1_700_000_000,
            kind: 30072,
            tags: vec![vec!["p".to_owned(), "b".repeat(64)]],
            content: "ciphertext?iv=abc".to_owned(),
            sig: "c".repeat(128),
        }
    }

    #[tokio::test]
    async fn connect_resolves_once_one_relay_is_up() {
        let server = MockRelayServer::start().await.unwrap();
        let pool = RelayPool::new();
        pool.add_relay(server.ws_url());

        tokio::time::timeout(Duration::from_secs(5), pool.connect())
            .await
            .expect("connect timed out")
            .expect("connect failed");

        pool.close().await;
    }

    #[tokio::test]
    async fn publish_reports_per_url_acceptance() {
        let good = MockRelayServer::start().await.unwrap();
        good.always_accept();

        let pool = RelayPool::new();
        pool.add_relay(good.ws_url());
        pool.connect().await.unwrap();

        let event = sample_event(&"1".repeat(64));
        let results = pool.publish(&event, None).await;
        assert_eq!(results.get(&good.ws_url()), Some(&true));

        pool.close().await;
    }

    #[tokio::test]
    async fn publish_to_unreachable_url_reports_false() {
        let pool = RelayPool::new();
        pool.add_relay("ws://127.0.0.1:1".to_owned()); // nothing listening
        let event = sample_event(&"2".repeat(64));

        let results = pool.publish(&event, None).await;
        assert_eq!(results.get("ws://127.0.0.1:1"), Some(&false));

        pool.close().await;
    }

    #[tokio::test]
    async fn subscribe_delivers_matching_events() {
        let server = MockRelayServer::start().await.unwrap();
        let pool = RelayPool::new();
        pool.add_relay(server.ws_url());
        pool.connect().await.unwrap();

        let mut rx = pool.subscribe("sub1", vec![Filter::new().kind(30072)], None);
        server.push_event("sub1", sample_event(&"3".repeat(64))).await;

        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event delivered")
            .expect("channel closed");
        assert_eq!(delivered.sub_id, "sub1");

        pool.close().await;
    }
}
