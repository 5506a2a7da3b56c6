//! Wire envelope and topic routing.

use serde::{Deserialize, Serialize};

/// Wire shape of a published event: `{"eventType": ..., "data": ...}`.
///
/// The core never interprets `data`; consumers re-type it against the event
/// types they know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Encode a payload into an envelope.
    pub fn new<T>(event_type: impl Into<String>, data: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Wrap an already-encoded payload.
    pub fn from_value(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Serialize the envelope for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an envelope from the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Re-type the payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Match a dot-separated routing key against a binding pattern.
///
/// `*` matches exactly one segment, `#` matches zero or more segments.
/// `order.*` matches `order.paid` but not `order.paid.retry`;
/// `order.#` matches both.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // '#' absorbs zero or more segments
            (0..=key.len()).any(|skip| segments_match(rest, &key[skip..]))
        }
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => segments_match(rest, key_rest),
            None => false,
        },
        Some((segment, rest)) => match key.split_first() {
            Some((head, key_rest)) => segment == head && segments_match(rest, key_rest),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_format_is_camel_case() {
        let envelope = Envelope::new("order.paid", &json!({"orderId": "o-1"})).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(raw["eventType"], "order.paid");
        assert_eq!(raw["data"]["orderId"], "o-1");

        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn exact_patterns() {
        assert!(topic_matches("order.paid", "order.paid"));
        assert!(!topic_matches("order.paid", "order.cancelled"));
        assert!(!topic_matches("order.paid", "order.paid.retry"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(topic_matches("order.*", "order.paid"));
        assert!(topic_matches("*.paid", "order.paid"));
        assert!(!topic_matches("order.*", "order"));
        assert!(!topic_matches("order.*", "order.paid.retry"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments() {
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.paid"));
        assert!(topic_matches("order.#", "order.paid.retry"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("order.#.paid", "invoice.generated"));
    }
}
