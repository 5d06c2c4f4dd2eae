//! Gossip Wire Format
//!
//! One JSON document per push, sent as the body of `POST /gossip/recv`:
//!
//! ```text
//! {
//!   "Update": [ { "Key": "user:1", "Value": {"name": "Ada"}, "V": 1700000000000000000 } ],
//!   "Delete": [ "session:9" ]
//! }
//! ```
//!
//! `V` is the record version in nanoseconds since the Unix epoch. Either
//! list may be missing or `null`; both are read as empty.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Path peers accept gossip on.
pub const GOSSIP_PATH: &str = "/gossip/recv";

/// One changed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipUpdate {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "V")]
    pub version: i64,
}

/// The payload pushed to every peer on each gossip round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    #[serde(rename = "Update", default, deserialize_with = "null_as_empty")]
    pub updates: Vec<GossipUpdate>,
    #[serde(rename = "Delete", default, deserialize_with = "null_as_empty")]
    pub deletes: Vec<String>,
}

impl GossipMessage {
    pub fn new(updates: Vec<GossipUpdate>, deletes: Vec<String>) -> Self {
        Self { updates, deletes }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_names_on_the_wire() {
        let message = GossipMessage::new(
            vec![GossipUpdate {
                key: "x".into(),
                value: json!({"n": 1}),
                version: 42,
            }],
            vec!["gone".into()],
        );
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(
            encoded,
            json!({
                "Update": [{"Key": "x", "Value": {"n": 1}, "V": 42}],
                "Delete": ["gone"],
            })
        );
    }

    #[test]
    fn test_null_and_missing_lists() {
        let message: GossipMessage =
            serde_json::from_str(r#"{"Update": null, "Delete": null}"#).unwrap();
        assert!(message.is_empty());

        let message: GossipMessage = serde_json::from_str(r#"{"Delete": ["a"]}"#).unwrap();
        assert!(message.updates.is_empty());
        assert_eq!(message.deletes, vec!["a".to_string()]);
    }

    #[test]
    fn test_rejects_malformed_update() {
        let result = serde_json::from_str::<GossipMessage>(r#"{"Update": [{"Key": "x"}]}"#);
        assert!(result.is_err());
    }
}
