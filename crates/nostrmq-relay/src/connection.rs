//! Relay connection (C3): one WebSocket to one relay — framing, liveness,
//! and send/recv of protocol messages. Owned exclusively by a [`crate::pool::RelayPool`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nostrmq_protocol::{ClientMessage, Event, Filter, RelayMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::backoff::{self, MAX_ATTEMPTS};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the pool waits for a matching `OK` frame before treating a
/// publish to a given URL as failed.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub state_label: &'static str,
    pub last_error: Option<String>,
    pub attempt: u32,
    /// True once the reconnect budget is exhausted and the URL requires a
    /// manual re-add; no further automatic reconnects will happen.
    pub parked: bool,
}

impl ConnectionStatus {
    fn new(state: ConnectionState) -> Self {
        Self {
            state_label: label(state),
            last_error: None,
            attempt: 0,
            parked: false,
        }
    }
}

fn label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Error => "error",
    }
}

/// Inbound traffic and lifecycle notifications the connection reports to
/// its owning pool.
#[derive(Debug)]
pub enum ConnectionEvent {
    StateChanged { url: String, state: ConnectionState, status: ConnectionStatus },
    Inbound { url: String, message: RelayMessage },
}

enum ConnectionCommand {
    Publish { event: Box<Event>, ack_tx: oneshot::Sender<bool> },
    Subscribe { sub_id: String, filters: Vec<Filter> },
    Unsubscribe { sub_id: String },
    Shutdown,
}

/// A pool-owned handle to one relay connection's background task.
pub struct ConnectionHandle {
    pub url: String,
    cmd_tx: mpsc::UnboundedSender<ConnectionCommand>,
    status: Arc<Mutex<ConnectionStatus>>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn spawn(url: String, events_tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(ConnectionStatus::new(ConnectionState::Disconnected)));
        let task = tokio::spawn(run_connection(url.clone(), cmd_rx, events_tx, Arc::clone(&status)));
        Self { url, cmd_tx, status, task }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().expect("status mutex poisoned").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status().state_label == "connected"
    }

    /// Publish `event`, resolving the returned receiver with whether a
    /// matching `OK true` was seen within the publish timeout.
    pub fn publish(&self, event: Event) -> oneshot::Receiver<bool> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnectionCommand::Publish { event: Box::new(event), ack_tx })
            .is_err()
        {
            // Connection task is gone; caller sees it as an immediate `false`
            // via the dropped sender, handled in the pool by the recv error path.
        }
        ack_rx
    }

    pub fn subscribe(&self, sub_id: String, filters: Vec<Filter>) {
        let _ = self.cmd_tx.send(ConnectionCommand::Subscribe { sub_id, filters });
    }

    pub fn unsubscribe(&self, sub_id: String) {
        let _ = self.cmd_tx.send(ConnectionCommand::Unsubscribe { sub_id });
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(ConnectionCommand::Shutdown);
        let _ = self.task.await;
    }
}

async fn run_connection(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    status: Arc<Mutex<ConnectionStatus>>,
) {
    // The pool spawns a connection to mean "connect now" — skip the backoff
    // wait for the very first attempt.
    let mut state = ConnectionState::Connecting;
    let mut attempt: u32 = 0;
    let mut active_subs: HashMap<String, Vec<Filter>> = HashMap::new();

    'outer: loop {
        match state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                if attempt >= MAX_ATTEMPTS {
                    // Parked: no further automatic reconnects. Still drain
                    // commands so Shutdown and queued subs don't leak, but
                    // publishes fail immediately.
                    match cmd_rx.recv().await {
                        Some(ConnectionCommand::Shutdown) | None => break 'outer,
                        Some(ConnectionCommand::Publish { ack_tx, .. }) => {
                            let _ = ack_tx.send(false);
                        }
                        Some(ConnectionCommand::Subscribe { sub_id, filters }) => {
                            active_subs.insert(sub_id, filters);
                        }
                        Some(ConnectionCommand::Unsubscribe { sub_id }) => {
                            active_subs.remove(&sub_id);
                        }
                    }
                    continue 'outer;
                }

                let delay = backoff::delay_for_attempt(attempt);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {
                        state = ConnectionState::Connecting;
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(ConnectionCommand::Shutdown) | None => break 'outer,
                            Some(ConnectionCommand::Publish { ack_tx, .. }) => {
                                let _ = ack_tx.send(false);
                            }
                            Some(ConnectionCommand::Subscribe { sub_id, filters }) => {
                                active_subs.insert(sub_id, filters);
                            }
                            Some(ConnectionCommand::Unsubscribe { sub_id }) => {
                                active_subs.remove(&sub_id);
                            }
                        }
                    }
                }
            }

            ConnectionState::Connecting => {
                match timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)).await {
                    Ok(Ok((ws, _response))) => {
                        attempt = 0;
                        state = ConnectionState::Connected;
                        set_status(&status, &events_tx, &url, state, None, attempt);
                        if let Err(err) = drive_connected(&url, ws, &mut cmd_rx, &events_tx, &mut active_subs).await {
                            attempt += 1;
                            state = ConnectionState::Error;
                            set_status(&status, &events_tx, &url, state, Some(err), attempt);
                        } else {
                            state = ConnectionState::Disconnected;
                            set_status(&status, &events_tx, &url, state, None, attempt);
                        }
                        continue 'outer;
                    }
                    Ok(Err(err)) => {
                        attempt += 1;
                        state = ConnectionState::Error;
                        set_status(&status, &events_tx, &url, state, Some(err.to_string()), attempt);
                    }
                    Err(_elapsed) => {
                        attempt += 1;
                        state = ConnectionState::Error;
                        set_status(
                            &status,
                            &events_tx,
                            &url,
                            state,
                            Some("connect timed out".to_owned()),
                            attempt,
                        );
                    }
                }
            }

            ConnectionState::Connected => unreachable!("handled inline in Connecting arm"),
        }
    }
}

/// Drives an established socket until it closes or errors, returning the
/// error string on the latter. Handles inbound frames (routing `OK` to the
/// pending publish map, everything else to `events_tx`) and outbound
/// commands (subscribe/unsubscribe/publish/shutdown) in one cooperative loop.
async fn drive_connected(
    url: &str,
    ws: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    events_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    active_subs: &mut HashMap<String, Vec<Filter>>,
) -> Result<(), String> {
    let (mut write, mut read) = ws.split();
    let mut pending_acks: HashMap<String, oneshot::Sender<bool>> = HashMap::new();

    for (sub_id, filters) in active_subs.iter() {
        send_client_message(
            &mut write,
            &ClientMessage::Req { sub_id: sub_id.clone(), filters: filters.clone() },
        )
        .await?;
    }

    loop {
        tokio::select! {
            frame = read.next() => {
                let Some(frame) = frame else {
                    return Ok(()); // clean close
                };
                let frame = frame.map_err(|e| e.to_string())?;
                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<RelayMessage>(&text) {
                            Ok(RelayMessage::Ok { event_id, accepted, message: _ }) => {
                                if let Some(ack_tx) = pending_acks.remove(&event_id) {
                                    let _ = ack_tx.send(accepted);
                                }
                            }
                            Ok(other) => {
                                let _ = events_tx.send(ConnectionEvent::Inbound {
                                    url: url.to_owned(),
                                    message: other,
                                });
                            }
                            Err(err) => {
                                tracing::debug!(%url, %err, "dropping unparseable relay frame");
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await.map_err(|e| e.to_string())?;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(ConnectionCommand::Shutdown) => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    Some(ConnectionCommand::Publish { event, ack_tx }) => {
                        let event_id = event.id.clone();
                        if let Err(err) = send_client_message(&mut write, &ClientMessage::Event(*event)).await {
                            let _ = ack_tx.send(false);
                            return Err(err);
                        }
                        // The pool enforces the 5s publish timeout by racing
                        // the oneshot receiver; if it times out there, the
                        // entry below is simply never claimed again.
                        pending_acks.insert(event_id, ack_tx);
                    }
                    Some(ConnectionCommand::Subscribe { sub_id, filters }) => {
                        active_subs.insert(sub_id.clone(), filters.clone());
                        send_client_message(&mut write, &ClientMessage::Req { sub_id, filters }).await?;
                    }
                    Some(ConnectionCommand::Unsubscribe { sub_id }) => {
                        active_subs.remove(&sub_id);
                        send_client_message(&mut write, &ClientMessage::Close(sub_id)).await?;
                    }
                }
            }
        }
    }
}

async fn send_client_message(
    write: &mut futures_util::stream::SplitSink<WsStream, Message>,
    message: &ClientMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    write.send(Message::Text(json.into())).await.map_err(|e| e.to_string())
}

fn set_status(
    status: &Arc<Mutex<ConnectionStatus>>,
    events_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    url: &str,
    state: ConnectionState,
    last_error: Option<String>,
    attempt: u32,
) {
    let new_status = ConnectionStatus {
        state_label: label(state),
        last_error,
        attempt,
        parked: state == ConnectionState::Error && attempt >= MAX_ATTEMPTS,
    };
    *status.lock().expect("status mutex poisoned") = new_status.clone();
    let _ = events_tx.send(ConnectionEvent::StateChanged { url: url.to_owned(), state, status: new_status });
}
