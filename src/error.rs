use std::collections::HashMap;

/// The error taxonomy this library surfaces to callers. Every variant
/// carries enough context (target URL, event id, declared vs actual bits)
/// to drive tests and operator diagnostics, per the error-handling design.
#[derive(Debug, thiserror::Error)]
pub enum NostrMqError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("proof-of-work mining timed out")]
    PowTimeout,
    #[error("no configured relay reached a connected state")]
    AllRelaysUnreachable,
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("publish timed out after {0}ms")]
    PublishTimeout(u64),
    #[error("no relay accepted the event: {0:?}")]
    PublishRejected(HashMap<String, bool>),
}
