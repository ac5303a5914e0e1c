//! Relay pool (C4): owns many [`ConnectionHandle`]s, publishes events to a
//! relay subset, multiplexes subscriptions, and fans inbound events out by
//! subscription id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nostrmq_protocol::{Event, Filter};
use tokio::sync::mpsc;

use crate::connection::{ConnectionEvent, ConnectionHandle, PUBLISH_TIMEOUT};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no configured relay reached a connected state")]
    AllRelaysUnreachable,
}

/// An inbound Nostr event delivered to a subscriber, tagged with the relay
/// URL it arrived from. The pool does not deduplicate across relays — that
/// is the receive pipeline's job.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub url: String,
    pub sub_id: String,
    pub event: Event,
}

struct SubscriptionRecord {
    filters: Vec<Filter>,
    urls: HashSet<String>,
}

/// Multi-relay WebSocket client. Cloning shares the same underlying state —
/// all clones observe the same connections and subscriptions.
#[derive(Clone)]
pub struct RelayPool {
    connections: Arc<Mutex<HashMap<String, ConnectionHandle>>>,
    subscriptions: Arc<Mutex<HashMap<String, SubscriptionRecord>>>,
    consumers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PoolEvent>>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl RelayPool {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool = Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            consumers: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
        };
        tokio::spawn(dispatch_loop(events_rx, Arc::clone(&pool.consumers)));
        pool
    }

    /// Add a relay and begin connecting immediately. A no-op if already present.
    pub fn add_relay(&self, url: impl Into<String>) {
        let url = url.into();
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        if connections.contains_key(&url) {
            return;
        }
        let handle = ConnectionHandle::spawn(url.clone(), self.events_tx.clone());
        connections.insert(url, handle);
    }

    /// Remove a relay, closing its socket. A no-op if not present.
    pub async fn remove_relay(&self, url: &str) {
        let handle = self.connections.lock().expect("connections mutex poisoned").remove(url);
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    pub fn relay_urls(&self) -> Vec<String> {
        self.connections.lock().expect("connections mutex poisoned").keys().cloned().collect()
    }

    /// Resolve once any configured relay reaches `Connected`. Fails only if
    /// every relay exhausts its reconnect budget first.
    pub async fn connect(&self) -> Result<(), PoolError> {
        loop {
            let (any_connected, all_parked, any_relays) = {
                let connections = self.connections.lock().expect("connections mutex poisoned");
                let any_relays = !connections.is_empty();
                let any_connected = connections.values().any(ConnectionHandle::is_connected);
                let all_parked = any_relays && connections.values().all(|c| c.status().parked);
                (any_connected, all_parked, any_relays)
            };
            if any_connected {
                return Ok(());
            }
            if any_relays && all_parked {
                return Err(PoolError::AllRelaysUnreachable);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Publish `event` to `urls` (or every known relay), sending `EVENT` to
    /// each that is currently connected and awaiting its own matching `OK`
    /// within the publish timeout. Returns per-URL acceptance.
    pub async fn publish(
        &self,
        event: &Event,
        urls: Option<&[String]>,
    ) -> HashMap<String, bool> {
        let targets = self.resolve_targets(urls);
        let mut waiters = Vec::with_capacity(targets.len());

        {
            let connections = self.connections.lock().expect("connections mutex poisoned");
            for url in &targets {
                match connections.get(url) {
                    Some(handle) if handle.is_connected() => {
                        let rx = handle.publish(event.clone());
                        waiters.push((url.clone(), Some(rx)));
                    }
                    _ => waiters.push((url.clone(), None)),
                }
            }
        }

        let mut results = HashMap::with_capacity(waiters.len());
        for (url, rx) in waiters {
            let accepted = match rx {
                None => false,
                Some(rx) => tokio::time::timeout(PUBLISH_TIMEOUT, rx).await.unwrap_or(Ok(false)).unwrap_or(false),
            };
            results.insert(url, accepted);
        }
        results
    }

    /// Record a subscription and `REQ` it to every currently connected URL
    /// in `urls` (or every known relay). Reconnects replay it automatically.
    pub fn subscribe(
        &self,
        sub_id: impl Into<String>,
        filters: Vec<Filter>,
        urls: Option<&[String]>,
    ) -> mpsc::UnboundedReceiver<PoolEvent> {
        let sub_id = sub_id.into();
        let targets = self.resolve_targets(urls);

        {
            let mut subs = self.subscriptions.lock().expect("subscriptions mutex poisoned");
            subs.insert(
                sub_id.clone(),
                SubscriptionRecord { filters: filters.clone(), urls: targets.iter().cloned().collect() },
            );
        }

        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        self.consumers.lock().expect("consumers mutex poisoned").insert(sub_id.clone(), consumer_tx);

        let connections = self.connections.lock().expect("connections mutex poisoned");
        for url in &targets {
            if let Some(handle) = connections.get(url) {
                handle.subscribe(sub_id.clone(), filters.clone());
            }
        }

        consumer_rx
    }

    /// `CLOSE` the subscription on `urls` (or all URLs it's active on). If no
    /// URLs remain active for it, the subscription is removed entirely.
    pub fn unsubscribe(&self, sub_id: &str, urls: Option<&[String]>) {
        let mut subs = self.subscriptions.lock().expect("subscriptions mutex poisoned");
        let Some(record) = subs.get_mut(sub_id) else {
            return;
        };

        let targets: Vec<String> = match urls {
            Some(urls) => urls.to_vec(),
            None => record.urls.iter().cloned().collect(),
        };

        let connections = self.connections.lock().expect("connections mutex poisoned");
        for url in &targets {
            record.urls.remove(url);
            if let Some(handle) = connections.get(url) {
                handle.unsubscribe(sub_id.to_owned());
            }
        }

        if record.urls.is_empty() {
            subs.remove(sub_id);
            self.consumers.lock().expect("consumers mutex poisoned").remove(sub_id);
        }
    }

    /// Close every connection and discard all subscriptions.
    pub async fn close(&self) {
        let handles: Vec<ConnectionHandle> = {
            let mut connections = self.connections.lock().expect("connections mutex poisoned");
            connections.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
        self.subscriptions.lock().expect("subscriptions mutex poisoned").clear();
        self.consumers.lock().expect("consumers mutex poisoned").clear();
    }

    fn resolve_targets(&self, urls: Option<&[String]>) -> Vec<String> {
        match urls {
            Some(urls) => urls.to_vec(),
            None => self.relay_urls(),
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes inbound connection events to per-subscription consumer channels.
async fn dispatch_loop(
    mut events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    consumers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PoolEvent>>>>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            ConnectionEvent::StateChanged { url, state, status } => {
                tracing::debug!(%url, ?state, attempt = status.attempt, "relay connection state changed");
            }
            ConnectionEvent::Inbound { url, message } => {
                if let nostrmq_protocol::RelayMessage::Event { sub_id, event } = message {
                    let consumers = consumers.lock().expect("consumers mutex poisoned");
                    if let Some(tx) = consumers.get(&sub_id) {
                        let _ = tx.send(PoolEvent { url, sub_id, event });
                    }
                }
            }
        }
    }
}
