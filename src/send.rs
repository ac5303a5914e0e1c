//! Send pipeline (C6): envelope -> encrypt -> template -> optional mine -> sign -> publish.

use std::time::{SystemTime, UNIX_EPOCH};

use nostrmq_protocol::EventTemplate;
use nostrmq_relay::RelayPool;

use crate::config::{validate_hex_key, Config};
use crate::envelope::{unique_id, CleartextEnvelope};
use crate::error::NostrMqError;

const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// How much proof-of-work a send should carry, resolved against
/// `config.pow_difficulty` at call time. Mirrors the source's loose
/// `false | 0 | true | <number>` input by giving each case its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowOption {
    Disabled,
    UseConfigDefault,
    Bits(u32),
}

impl Default for PowOption {
    fn default() -> Self {
        PowOption::Disabled
    }
}

impl PowOption {
    fn resolve(self, config: &Config) -> u32 {
        match self {
            PowOption::Disabled => 0,
            PowOption::UseConfigDefault => config.pow_difficulty,
            PowOption::Bits(n) => n,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub target: String,
    pub payload: serde_json::Value,
    pub response: Option<String>,
    pub relays: Option<Vec<String>>,
    pub pow: PowOption,
    pub timeout_ms: u64,
}

impl SendRequest {
    pub fn new(target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            target: target.into(),
            payload,
            response: None,
            relays: None,
            pow: PowOption::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn relays(mut self, relays: Vec<String>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn pow(mut self, pow: PowOption) -> Self {
        self.pow = pow;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Encrypt, optionally mine, sign, and publish `request`. Returns the id of
/// the published event. Succeeds iff at least one targeted relay accepted it.
pub async fn send(config: &Config, pool: &RelayPool, request: SendRequest) -> Result<String, NostrMqError> {
    validate_hex_key(&request.target, "target").map_err(|_| {
        NostrMqError::InvalidArgument(format!("target is not a valid pubkey: {}", request.target))
    })?;
    if let Some(response) = &request.response {
        validate_hex_key(response, "response")
            .map_err(|_| NostrMqError::InvalidArgument(format!("response is not a valid pubkey: {response}")))?;
    }

    let response = request.response.clone().unwrap_or_else(|| config.pubkey.clone());

    let envelope = CleartextEnvelope { target: request.target.clone(), response: response.clone(), payload: request.payload };
    let cleartext = serde_json::to_string(&envelope)
        .map_err(|e| NostrMqError::InvalidArgument(format!("payload is not json-serializable: {e}")))?;

    let ciphertext = nostrmq_crypto::encrypt(&config.secret_key, &request.target, &cleartext)
        .map_err(|e| NostrMqError::Encrypt(e.to_string()))?;

    let mut tags = vec![vec!["p".to_owned(), request.target.clone()], vec!["d".to_owned(), unique_id()]];
    if response != config.pubkey {
        tags.push(vec!["response".to_owned(), response]);
    }

    let template = EventTemplate {
        pubkey: config.pubkey.clone(),
        created_at: now(),
        kind: nostrmq_protocol::MESSAGE_KIND,
        tags,
        content: ciphertext,
    };

    let bits = request.pow.resolve(config);
    let template = if bits > 0 {
        nostrmq_pow::mine_event_pow(template, bits, config.pow_threads, std::time::Duration::from_secs(300))
            .await
            .map_err(|_| NostrMqError::PowTimeout)?
    } else {
        template
    };

    let id = nostrmq_crypto::event_hash(&template);
    let sig = nostrmq_crypto::sign(&config.secret_key, &id).map_err(|e| NostrMqError::Sign(e.to_string()))?;
    let event = nostrmq_protocol::Event {
        id: id.clone(),
        pubkey: template.pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags,
        content: template.content,
        sig,
    };

    pool.connect().await.map_err(|_| NostrMqError::AllRelaysUnreachable)?;

    let urls = request.relays;
    let results = tokio::time::timeout(
        std::time::Duration::from_millis(request.timeout_ms),
        pool.publish(&event, urls.as_deref()),
    )
    .await
    .map_err(|_| NostrMqError::PublishTimeout(request.timeout_ms))?;

    if results.values().any(|accepted| *accepted) {
        Ok(id)
    } else {
        Err(NostrMqError::PublishRejected(results))
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before unix epoch").as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_option_resolves_each_case() {
        let config = Config::new("1".repeat(64), vec!["wss://relay.example".to_owned()]).unwrap();
        let mut config = config;
        config.pow_difficulty = 16;
        assert_eq!(PowOption::Disabled.resolve(&config), 0);
        assert_eq!(PowOption::UseConfigDefault.resolve(&config), 16);
        assert_eq!(PowOption::Bits(4).resolve(&config), 4);
    }

    #[test]
    fn builder_defaults_timeout_and_pow() {
        let request = SendRequest::new("a".repeat(64), serde_json::json!({"n": 1}));
        assert_eq!(request.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(request.pow, PowOption::Disabled);
    }
}
