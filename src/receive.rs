//! Receive pipeline (C7): subscribe -> validate/decrypt -> de-duplicate -> deliver.

use std::sync::Arc;

use nostrmq_protocol::{Event, Filter, MESSAGE_KIND};
use nostrmq_relay::RelayPool;
use nostrmq_tracker::ReplayTracker;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::{validate_hex_key, Config};
use crate::envelope::CleartextEnvelope;
use crate::error::NostrMqError;

/// A payload that survived validation and decryption, ready for the caller.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub payload: serde_json::Value,
    pub sender: String,
    pub raw_event: Event,
}

/// User callback invoked for every delivered message. Returning `Err`
/// is logged and swallowed — the message is still marked processed.
pub type OnMessage = Arc<dyn Fn(&serde_json::Value, &str, &Event) -> Result<(), String> + Send + Sync>;

pub struct ReceiveRequest {
    pub on_message: OnMessage,
    pub relays: Option<Vec<String>>,
    pub privkey_override: Option<String>,
    /// Declared but not required to do anything, per the source hook this
    /// preserves: see design notes on auto-ack.
    pub auto_ack: bool,
}

impl ReceiveRequest {
    pub fn new(on_message: OnMessage) -> Self {
        Self { on_message, relays: None, privkey_override: None, auto_ack: false }
    }

    pub fn relays(mut self, relays: Vec<String>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn privkey_override(mut self, secret_key: impl Into<String>) -> Self {
        self.privkey_override = Some(secret_key.into());
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}

/// The caller-visible handle for an open subscription. `close()` is
/// idempotent: it cancels the subscription on every relay it was sent to
/// and ends the stream consumer view.
pub struct SubscriptionHandle {
    sub_id: String,
    pool: RelayPool,
    urls: Option<Vec<String>>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    messages_rx: Mutex<mpsc::UnboundedReceiver<DeliveredMessage>>,
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    /// The next delivered message, or `None` once the subscription is closed.
    pub async fn recv(&self) -> Option<DeliveredMessage> {
        self.messages_rx.lock().await.recv().await
    }

    pub async fn close(&self) {
        if let Some(tx) = self.close_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.pool.unsubscribe(&self.sub_id, self.urls.as_deref());
    }

    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// Validate, subscribe, and start delivering decrypted payloads addressed to
/// `config.pubkey` (or the override). Returns immediately with a handle;
/// delivery happens on a background task.
pub async fn receive(
    config: &Config,
    pool: &RelayPool,
    request: ReceiveRequest,
) -> Result<SubscriptionHandle, NostrMqError> {
    let secret_key = match &request.privkey_override {
        Some(key) => {
            validate_hex_key(key, "privkey_override")
                .map_err(|_| NostrMqError::InvalidArgument("privkey_override is not a valid secret key".to_owned()))?;
            key.clone()
        }
        None => config.secret_key.clone(),
    };
    let self_pubkey = nostrmq_crypto::derive_pub(&secret_key)
        .map_err(|e| NostrMqError::InvalidArgument(format!("could not derive public key: {e}")))?;

    let tracker = ReplayTracker::new(config.tracker_config()).await;

    pool.connect().await.map_err(|_| NostrMqError::AllRelaysUnreachable)?;

    let sub_id = crate::envelope::unique_id();
    let filter = Filter::new().kind(MESSAGE_KIND).p_tag(self_pubkey.clone()).since(tracker.subscription_since());
    let pool_events = pool.subscribe(sub_id.clone(), vec![filter], request.relays.as_deref());

    let (messages_tx, messages_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();

    let task = tokio::spawn(run_receive_loop(
        sub_id.clone(),
        self_pubkey,
        secret_key,
        tracker,
        pool_events,
        request.on_message,
        messages_tx,
        close_rx,
    ));

    Ok(SubscriptionHandle {
        sub_id,
        pool: pool.clone(),
        urls: request.relays,
        close_tx: Mutex::new(Some(close_tx)),
        messages_rx: Mutex::new(messages_rx),
        task,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_receive_loop(
    sub_id: String,
    self_pubkey: String,
    secret_key: String,
    mut tracker: ReplayTracker,
    mut pool_events: mpsc::UnboundedReceiver<nostrmq_relay::PoolEvent>,
    on_message: OnMessage,
    messages_tx: mpsc::UnboundedSender<DeliveredMessage>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut close_rx => return,
            pool_event = pool_events.recv() => {
                let Some(pool_event) = pool_event else { return };
                if pool_event.sub_id != sub_id {
                    continue;
                }
                handle_event(&self_pubkey, &secret_key, &mut tracker, &on_message, &messages_tx, pool_event.event).await;
            }
        }
    }
}

async fn handle_event(
    self_pubkey: &str,
    secret_key: &str,
    tracker: &mut ReplayTracker,
    on_message: &OnMessage,
    messages_tx: &mpsc::UnboundedSender<DeliveredMessage>,
    event: Event,
) {
    if event.kind != MESSAGE_KIND {
        return;
    }
    if !event.tag_values("p").any(|p| p == self_pubkey) {
        return;
    }
    if tracker.has_processed(&event.id, event.created_at) {
        return;
    }

    let Ok(cleartext) = nostrmq_crypto::decrypt(secret_key, &event.pubkey, &event.content) else {
        tracing::debug!(event_id = %event.id, "dropping event with undecryptable content");
        return;
    };

    let Ok(envelope) = serde_json::from_str::<CleartextEnvelope>(&cleartext) else {
        tracing::debug!(event_id = %event.id, "dropping event with malformed envelope");
        return;
    };
    if envelope.target != self_pubkey
        || validate_hex_key(&envelope.target, "target").is_err()
        || validate_hex_key(&envelope.response, "response").is_err()
    {
        tracing::debug!(event_id = %event.id, "dropping event with invalid envelope fields");
        return;
    }

    if let Err(err) = on_message(&envelope.payload, &event.pubkey, &event) {
        tracing::warn!(event_id = %event.id, %err, "on_message callback returned an error");
    }
    let _ = messages_tx.send(DeliveredMessage {
        payload: envelope.payload,
        sender: event.pubkey.clone(),
        raw_event: event.clone(),
    });

    // Marked processed regardless of callback outcome: the message was delivered.
    tracker.mark_processed(&event.id, event.created_at).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_message_carries_sender_and_payload() {
        let event = Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1,
            kind: MESSAGE_KIND,
            tags: vec![],
            content: String::new(),
            sig: "c".repeat(128),
        };
        let msg = DeliveredMessage { payload: serde_json::json!({"n": 1}), sender: event.pubkey.clone(), raw_event: event };
        assert_eq!(msg.payload["n"], 1);
    }
}
