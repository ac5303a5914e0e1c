// A thin relay-side test client: connects to a relay (real or another mock)
// and lets a test script send/receive raw protocol messages directly,
// without going through the pool.

use futures_util::{SinkExt, StreamExt};
use nostrmq_protocol::{ClientMessage, RelayMessage};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockRelayClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockRelayClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(message)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<RelayMessage, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by peer".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }
}
