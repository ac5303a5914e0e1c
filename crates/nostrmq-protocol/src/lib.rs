//! Wire types for the Nostr relay protocol subset this library speaks.
//!
//! Relay messages are JSON arrays, not tagged objects (`["EVENT", <event>]`,
//! not `{"type": "event", ...}`), so [`ClientMessage`] and [`RelayMessage`]
//! carry hand-rolled `Serialize`/`Deserialize` impls that walk a
//! [`serde_json::Value`] rather than deriving from a struct shape.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// The fixed event kind this system uses to distinguish its traffic from
/// other Nostr events on a shared relay.
pub const MESSAGE_KIND: u16 = 30072;

/// A canonical Nostr event, as defined by NIP-01.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Find the first value of the first tag named `name`, e.g. `tag_value("p")`
    /// for `["p", "<hex>"]`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values of tags named `name`, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }
}

/// An unsigned, un-hashed event template, prior to PoW mining and signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A subscription filter, as sent in a `REQ` message.
///
/// Field names follow NIP-01; `p_tag` serializes as the non-identifier key
/// `"#p"`, which is why this type cannot use plain field-name matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tag: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds = Some(vec![kind]);
        self
    }

    pub fn p_tag(mut self, pubkey: impl Into<String>) -> Self {
        self.p_tag = Some(vec![pubkey.into()]);
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }
}

/// Messages sent from this library to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Event),
    Req { sub_id: String, filters: Vec<Filter> },
    Close(String),
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Event(event) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(event)?;
                seq.end()
            }
            ClientMessage::Req { sub_id, filters } => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(sub_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            ClientMessage::Close(sub_id) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("CLOSE")?;
                seq.serialize_element(sub_id)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
        let label = raw
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| de::Error::custom("missing message label"))?;
        match label {
            "EVENT" => {
                let event = raw
                    .get(1)
                    .cloned()
                    .ok_or_else(|| de::Error::custom("EVENT missing body"))?;
                let event: Event = serde_json::from_value(event).map_err(de::Error::custom)?;
                Ok(ClientMessage::Event(event))
            }
            "REQ" => {
                let sub_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("REQ missing sub_id"))?
                    .to_owned();
                let filters = raw
                    .get(2..)
                    .unwrap_or_default()
                    .iter()
                    .cloned()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<Filter>, _>>()
                    .map_err(de::Error::custom)?;
                Ok(ClientMessage::Req { sub_id, filters })
            }
            "CLOSE" => {
                let sub_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("CLOSE missing sub_id"))?
                    .to_owned();
                Ok(ClientMessage::Close(sub_id))
            }
            other => Err(de::Error::custom(format!("unknown client message {other}"))),
        }
    }
}

/// Messages sent from a relay to this library.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: String, event: Event },
    Ok { event_id: String, accepted: bool, message: String },
    Eose { sub_id: String },
    Closed { sub_id: String, message: String },
    Notice { message: String },
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelayMessage::Event { sub_id, event } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(sub_id)?;
                seq.serialize_element(event)?;
                seq.end()
            }
            RelayMessage::Ok { event_id, accepted, message } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("OK")?;
                seq.serialize_element(event_id)?;
                seq.serialize_element(accepted)?;
                seq.serialize_element(message)?;
                seq.end()
            }
            RelayMessage::Eose { sub_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EOSE")?;
                seq.serialize_element(sub_id)?;
                seq.end()
            }
            RelayMessage::Closed { sub_id, message } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("CLOSED")?;
                seq.serialize_element(sub_id)?;
                seq.serialize_element(message)?;
                seq.end()
            }
            RelayMessage::Notice { message } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("NOTICE")?;
                seq.serialize_element(message)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RelayMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
        let label = raw
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| de::Error::custom("missing message label"))?;
        match label {
            "EVENT" => {
                let sub_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("EVENT missing sub_id"))?
                    .to_owned();
                let event = raw
                    .get(2)
                    .cloned()
                    .ok_or_else(|| de::Error::custom("EVENT missing body"))?;
                let event: Event = serde_json::from_value(event).map_err(de::Error::custom)?;
                Ok(RelayMessage::Event { sub_id, event })
            }
            "OK" => {
                let event_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("OK missing event id"))?
                    .to_owned();
                let accepted = raw
                    .get(2)
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| de::Error::custom("OK missing accepted bool"))?;
                let message = raw
                    .get(3)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                Ok(RelayMessage::Ok { event_id, accepted, message })
            }
            "EOSE" => {
                let sub_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("EOSE missing sub_id"))?
                    .to_owned();
                Ok(RelayMessage::Eose { sub_id })
            }
            "CLOSED" => {
                let sub_id = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| de::Error::custom("CLOSED missing sub_id"))?
                    .to_owned();
                let message = raw
                    .get(2)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                Ok(RelayMessage::Closed { sub_id, message })
            }
            "NOTICE" => {
                let message = raw
                    .get(1)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                Ok(RelayMessage::Notice { message })
            }
            other => Err(de::Error::custom(format!("unknown relay message {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: MESSAGE_KIND,
            tags: vec![vec!["p".to_owned(), "c".repeat(64)]],
            content: "ciphertext?iv=abc".to_owned(),
            sig: "d".repeat(128),
        }
    }

    #[test]
    fn event_round_trips_as_array() {
        let msg = ClientMessage::Event(sample_event());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with("[\"EVENT\","));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn req_serializes_filters_positionally() {
        let msg = ClientMessage::Req {
            sub_id: "sub1".to_owned(),
            filters: vec![Filter::new().kind(MESSAGE_KIND).p_tag("abc").since(10)],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json[0], "REQ");
        assert_eq!(json[1], "sub1");
        assert_eq!(json[2]["#p"][0], "abc");
    }

    #[test]
    fn ok_message_parses_from_relay_wire() {
        let raw = serde_json::json!(["OK", "eventid", true, ""]);
        let msg: RelayMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Ok {
                event_id: "eventid".to_owned(),
                accepted: true,
                message: String::new(),
            }
        );
    }

    #[test]
    fn unknown_label_is_rejected() {
        let raw = serde_json::json!(["AUTH", "challenge"]);
        let err = serde_json::from_value::<RelayMessage>(raw).unwrap_err();
        assert!(err.to_string().contains("unknown relay message"));
    }

    #[test]
    fn tag_value_finds_first_match() {
        let event = sample_event();
        assert_eq!(event.tag_value("p"), Some(event.tags[0][1].as_str()));
        assert_eq!(event.tag_value("nonce"), None);
    }
}
