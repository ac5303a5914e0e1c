//! The cleartext envelope carried inside `event.content` before encryption.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleartextEnvelope {
    pub target: String,
    pub response: String,
    pub payload: serde_json::Value,
}

/// An opaque, ASCII-safe identifier for the event's `d` tag.
pub fn unique_id() -> String {
    Uuid::new_v4().simple().to_string()
}
