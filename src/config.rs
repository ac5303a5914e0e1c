//! Config / validation (C8): parses static configuration and validates key
//! material and relay URLs. Environment variables use the canonical
//! `NOSTRMQ_*` prefix (see `DESIGN.md` for why, over the source's drifting
//! `NOSTR_*`/`NOSTRMQ_*` mix).

use std::env;

use serde::Deserialize;

use crate::error::NostrMqError;

const DEFAULT_POW_THREADS: usize = 1;
const DEFAULT_LOOKBACK_SECONDS: i64 = 3600;
const DEFAULT_TRACK_LIMIT: usize = 100;
const DEFAULT_CACHE_DIR: &str = ".nostrmq";

/// Validated, ready-to-use configuration for a [`crate::NostrMq`] client.
#[derive(Debug, Clone)]
pub struct Config {
    pub secret_key: String,
    pub pubkey: String,
    pub relays: Vec<String>,
    pub pow_difficulty: u32,
    pub pow_threads: usize,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub lookback_seconds: i64,
    pub track_limit: usize,
    pub cache_dir: String,
    pub enable_persistence: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
            track_limit: DEFAULT_TRACK_LIMIT,
            cache_dir: DEFAULT_CACHE_DIR.to_owned(),
            enable_persistence: true,
        }
    }
}

impl Config {
    /// Build and validate a config from already-known values (no file or
    /// env involved). Useful for tests and programmatic construction.
    pub fn new(secret_key: impl Into<String>, relays: Vec<String>) -> Result<Self, NostrMqError> {
        let raw = RawConfig {
            secret_key: Some(secret_key.into()),
            relays: Some(relays),
            ..RawConfig::default()
        };
        build(raw)
    }

    pub fn tracker_config(&self) -> nostrmq_tracker::TrackerConfig {
        nostrmq_tracker::TrackerConfig::new()
            .lookback_seconds(self.tracking.lookback_seconds)
            .track_limit(self.tracking.track_limit)
            .cache_dir(self.tracking.cache_dir.clone())
            .enable_persistence(self.tracking.enable_persistence)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    secret_key: Option<String>,
    relays: Option<Vec<String>>,
    pow_difficulty: Option<u32>,
    pow_threads: Option<usize>,
    tracking: Option<RawTrackingConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTrackingConfig {
    lookback_seconds: Option<i64>,
    track_limit: Option<usize>,
    cache_dir: Option<String>,
    enable_persistence: Option<bool>,
}

/// Parse a TOML document into a [`Config`], then apply any `NOSTRMQ_*`
/// environment overrides on top of it.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, NostrMqError> {
    let mut raw: RawConfig =
        toml::from_str(toml_str).map_err(|e| NostrMqError::Config(format!("invalid config toml: {e}")))?;
    apply_env_overrides(&mut raw);
    build(raw)
}

/// Build a [`Config`] purely from `NOSTRMQ_*` environment variables.
pub fn load_config_from_env() -> Result<Config, NostrMqError> {
    let mut raw = RawConfig::default();
    apply_env_overrides(&mut raw);
    build(raw)
}

fn apply_env_overrides(raw: &mut RawConfig) {
    if let Ok(v) = env::var("NOSTRMQ_SECRET_KEY") {
        raw.secret_key = Some(v);
    }
    if let Ok(v) = env::var("NOSTRMQ_RELAYS") {
        raw.relays = Some(v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect());
    }
    if let Ok(v) = env::var("NOSTRMQ_POW_DIFFICULTY") {
        if let Ok(parsed) = v.parse() {
            raw.pow_difficulty = Some(parsed);
        }
    }
    if let Ok(v) = env::var("NOSTRMQ_POW_THREADS") {
        if let Ok(parsed) = v.parse() {
            raw.pow_threads = Some(parsed);
        }
    }
    if let Ok(v) = env::var("NOSTRMQ_CACHE_DIR") {
        raw.tracking.get_or_insert_with(RawTrackingConfig::default).cache_dir = Some(v);
    }
}

fn build(raw: RawConfig) -> Result<Config, NostrMqError> {
    let secret_key = raw
        .secret_key
        .ok_or_else(|| NostrMqError::Config("secret_key is required".to_owned()))?;
    validate_hex_key(&secret_key, "secret_key")?;
    let pubkey = nostrmq_crypto::derive_pub(&secret_key)
        .map_err(|e| NostrMqError::Config(format!("could not derive public key: {e}")))?;

    let relays = raw
        .relays
        .filter(|r| !r.is_empty())
        .ok_or_else(|| NostrMqError::Config("at least one relay URL is required".to_owned()))?;
    for relay in &relays {
        validate_relay_url(relay)?;
    }

    let raw_tracking = raw.tracking.unwrap_or_default();
    let tracking = TrackingConfig {
        lookback_seconds: raw_tracking.lookback_seconds.unwrap_or(DEFAULT_LOOKBACK_SECONDS),
        track_limit: raw_tracking.track_limit.unwrap_or(DEFAULT_TRACK_LIMIT),
        cache_dir: raw_tracking.cache_dir.unwrap_or_else(|| DEFAULT_CACHE_DIR.to_owned()),
        enable_persistence: raw_tracking.enable_persistence.unwrap_or(true),
    };

    let pow_threads = raw.pow_threads.unwrap_or(DEFAULT_POW_THREADS);
    if pow_threads == 0 {
        return Err(NostrMqError::Config("pow_threads must be >= 1".to_owned()));
    }

    Ok(Config {
        secret_key,
        pubkey,
        relays,
        pow_difficulty: raw.pow_difficulty.unwrap_or(0),
        pow_threads,
        tracking,
    })
}

pub(crate) fn validate_hex_key(value: &str, field: &str) -> Result<(), NostrMqError> {
    if value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Ok(())
    } else {
        Err(NostrMqError::Config(format!("{field} must be 64 lowercase hex characters")))
    }
}

fn validate_relay_url(url: &str) -> Result<(), NostrMqError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(NostrMqError::Config(format!("relay url must use ws:// or wss://: {url}")))
    }
}
