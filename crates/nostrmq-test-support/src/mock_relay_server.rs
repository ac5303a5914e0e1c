// A mock Nostr relay for integration-testing the relay pool without a real
// relay. Accepts WebSocket connections, replies to EVENT with a
// configurable OK, and fans an accepted EVENT back out to every active
// subscription on every connection (including the publisher's own), the
// way a real relay serves a published event to matching open REQs.
// `push_event` additionally lets a test deliver an arbitrary event under
// an explicit sub_id, bypassing the accept/fan-out path entirely.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use nostrmq_protocol::{ClientMessage, Event, RelayMessage};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;

const ACCEPT: u8 = 0;
const REJECT: u8 = 1;
const CLOSE_ON_EVENT: u8 = 2;

/// A mock relay for integration tests. Binds to a random port; each test
/// gets its own isolated instance.
pub struct MockRelayServer {
    addr: SocketAddr,
    events_tx: broadcast::Sender<(String, Event)>,
    published_tx: broadcast::Sender<Event>,
    behavior: Arc<AtomicU8>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockRelayServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (events_tx, _) = broadcast::channel(256);
        let (published_tx, _) = broadcast::channel(256);
        let behavior = Arc::new(AtomicU8::new(ACCEPT));

        let task_events_tx = events_tx.clone();
        let task_published_tx = published_tx.clone();
        let task_behavior = Arc::clone(&behavior);
        let task = tokio::spawn(async move {
            accept_loop(listener, task_events_tx, task_published_tx, task_behavior).await;
        });

        Ok(Self { addr, events_tx, published_tx, behavior, _task: task })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Reply `OK <id> true` to every published event (the default).
    pub fn always_accept(&self) {
        self.behavior.store(ACCEPT, Ordering::SeqCst);
    }

    /// Reply `OK <id> false` to every published event.
    pub fn always_reject(&self) {
        self.behavior.store(REJECT, Ordering::SeqCst);
    }

    /// Close the socket on receipt of an EVENT, without sending an OK —
    /// simulates an unresponsive relay for publish-timeout scenarios.
    pub fn close_on_event(&self) {
        self.behavior.store(CLOSE_ON_EVENT, Ordering::SeqCst);
    }

    /// Push `event` to every connection currently subscribed under `sub_id`.
    pub async fn push_event(&self, sub_id: &str, event: Event) {
        let _ = self.events_tx.send((sub_id.to_owned(), event));
    }
}

async fn accept_loop(
    listener: TcpListener,
    events_tx: broadcast::Sender<(String, Event)>,
    published_tx: broadcast::Sender<Event>,
    behavior: Arc<AtomicU8>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let events_tx = events_tx.clone();
                let published_tx = published_tx.clone();
                let behavior = Arc::clone(&behavior);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, events_tx, published_tx, behavior).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    events_tx: broadcast::Sender<(String, Event)>,
    published_tx: broadcast::Sender<Event>,
    behavior: Arc<AtomicU8>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut subs: HashSet<String> = HashSet::new();
    let mut inbox = events_tx.subscribe();
    let mut published_inbox = published_tx.subscribe();

    loop {
        tokio::select! {
            frame = read.next() => {
                let Some(frame) = frame else { break };
                let frame = frame?;
                let text = match frame {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                        continue;
                    }
                    _ => continue,
                };

                let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) else { continue };
                match msg {
                    ClientMessage::Event(event) => {
                        match behavior.load(Ordering::SeqCst) {
                            CLOSE_ON_EVENT => break,
                            REJECT => {
                                let ok = RelayMessage::Ok { event_id: event.id, accepted: false, message: "rejected".to_owned() };
                                write.send(Message::Text(serde_json::to_string(&ok)?.into())).await?;
                            }
                            _ => {
                                let ok = RelayMessage::Ok { event_id: event.id.clone(), accepted: true, message: String::new() };
                                write.send(Message::Text(serde_json::to_string(&ok)?.into())).await?;
                                let _ = published_tx.send(event);
                            }
                        }
                    }
                    ClientMessage::Req { sub_id, .. } => {
                        subs.insert(sub_id.clone());
                        let eose = RelayMessage::Eose { sub_id };
                        write.send(Message::Text(serde_json::to_string(&eose)?.into())).await?;
                    }
                    ClientMessage::Close(sub_id) => {
                        subs.remove(&sub_id);
                    }
                }
            }
            received = inbox.recv(), if !subs.is_empty() => {
                if let Ok((sub_id, event)) = received {
                    if subs.contains(&sub_id) {
                        let msg = RelayMessage::Event { sub_id, event };
                        write.send(Message::Text(serde_json::to_string(&msg)?.into())).await?;
                    }
                }
            }
            received = published_inbox.recv(), if !subs.is_empty() => {
                if let Ok(event) = received {
                    for sub_id in subs.iter() {
                        let msg = RelayMessage::Event { sub_id: sub_id.clone(), event: event.clone() };
                        write.send(Message::Text(serde_json::to_string(&msg)?.into())).await?;
                    }
                }
            }
        }
    }

    Ok(())
}
