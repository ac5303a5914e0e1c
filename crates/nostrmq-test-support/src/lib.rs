mod mock_relay_client;
mod mock_relay_server;

pub use mock_relay_client::MockRelayClient;
pub use mock_relay_server::MockRelayServer;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_starts_and_reports_a_ws_url() {
        let server = MockRelayServer::start().await.unwrap();
        assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
    }

    #[tokio::test]
    async fn client_connects_and_gets_eose_after_req() {
        let server = MockRelayServer::start().await.unwrap();
        let mut client = MockRelayClient::connect(&server.ws_url()).await.unwrap();

        client
            .send(&nostrmq_protocol::ClientMessage::Req {
                sub_id: "sub1".to_owned(),
                filters: vec![nostrmq_protocol::Filter::new().kind(30072)],
            })
            .await
            .unwrap();

        let reply = client.recv().await.unwrap();
        assert_eq!(reply, nostrmq_protocol::RelayMessage::Eose { sub_id: "sub1".to_owned() });
    }
}
