//! Encrypted, point-to-point RPC messaging layered on the Nostr relay
//! protocol. An application identifies itself by a long-term key pair and
//! uses [`NostrMq`] to send JSON payloads to a peer's public key, and to
//! subscribe to payloads addressed to itself.
//!
//! The underlying subsystems — relay pool, send/receive pipelines, replay
//! tracker, and proof-of-work engine — live in their own crates; this crate
//! wires them together behind one client type.

mod config;
mod envelope;
mod error;
mod receive;
mod send;

pub use config::{load_config_from_env, load_config_from_str, Config, TrackingConfig};
pub use envelope::CleartextEnvelope;
pub use error::NostrMqError;
pub use nostrmq_protocol::Event;
pub use receive::{DeliveredMessage, OnMessage, ReceiveRequest, SubscriptionHandle};
pub use send::{PowOption, SendRequest};

use nostrmq_relay::RelayPool;

/// A configured client: owns a relay pool and exposes the send/receive
/// pipelines and the proof-of-work operations callers may invoke directly.
pub struct NostrMq {
    config: Config,
    pool: RelayPool,
}

impl NostrMq {
    pub fn new(config: Config) -> Self {
        let pool = RelayPool::new();
        for relay in &config.relays {
            pool.add_relay(relay.clone());
        }
        Self { config, pool }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pubkey(&self) -> &str {
        &self.config.pubkey
    }

    /// Add a relay to the pool beyond those in the config, connecting immediately.
    pub fn add_relay(&self, url: impl Into<String>) {
        self.pool.add_relay(url);
    }

    pub async fn remove_relay(&self, url: &str) {
        self.pool.remove_relay(url).await;
    }

    /// Encrypt, optionally mine, sign, and publish `request`. Returns the
    /// published event's id; fails unless at least one relay acknowledged it.
    pub async fn send(&self, request: SendRequest) -> Result<String, NostrMqError> {
        send::send(&self.config, &self.pool, request).await
    }

    /// Subscribe to payloads addressed to this client (or `privkey_override`'s
    /// derived pubkey), delivering each to `on_message` and to the returned
    /// handle's stream view.
    pub async fn receive(&self, request: ReceiveRequest) -> Result<SubscriptionHandle, NostrMqError> {
        receive::receive(&self.config, &self.pool, request).await
    }

    /// Mine `template` to `bits` leading zero bits using `config.pow_threads`
    /// workers, with a 5-minute deadline. `bits = 0` returns the template
    /// unchanged.
    pub async fn mine_event_pow(
        &self,
        template: nostrmq_protocol::EventTemplate,
        bits: u32,
    ) -> Result<nostrmq_protocol::EventTemplate, NostrMqError> {
        nostrmq_pow::mine_event_pow(template, bits, self.config.pow_threads, std::time::Duration::from_secs(300))
            .await
            .map_err(|_| NostrMqError::PowTimeout)
    }

    pub fn has_valid_pow(&self, event: &Event, bits: u32) -> bool {
        nostrmq_pow::has_valid_pow(event, bits)
    }

    pub fn validate_pow_difficulty(&self, event_id_hex: &str, bits: u32) -> bool {
        nostrmq_pow::validate_pow_difficulty(event_id_hex, bits)
    }

    /// Close every relay connection. Pending publishes resolve with whatever
    /// results they had.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
