use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One verification-code record as returned by the campaign API.
///
/// Not owned by this system: only the fields the formatter reads are typed,
/// everything else round-trips through `extra` so the audit log preserves
/// what the API actually sent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "stringy")]
    pub number: String,
    #[serde(default, deserialize_with = "stringy")]
    pub service_name: String,
    #[serde(default, deserialize_with = "stringy")]
    pub message: String,
    #[serde(default, deserialize_with = "stringy")]
    pub range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawMessage {
    /// Deterministic dedup identity: two records with the same key are the
    /// same notification regardless of which account fetched them.
    pub fn key(&self) -> MessageKey {
        MessageKey(format!(
            "{}|{}|{}|{}",
            self.number, self.service_name, self.range, self.message
        ))
    }
}

/// Composite dedup key over `(number, service_name, range, message)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One destination that acknowledged a send.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SentDestination {
    pub group: String,
    pub chat_id: String,
    pub message_id: Option<i64>,
}

/// Immutable audit entry appended once a message reached at least one
/// destination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub number: String,
    pub code: String,
    pub service_name: String,
    #[serde(default)]
    pub range: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<serde_json::Value>,
    pub groups: Vec<SentDestination>,
    pub sent_at: String,
}

impl DeliveryRecord {
    pub fn from_message(
        item: &RawMessage,
        code: String,
        groups: Vec<SentDestination>,
        sent_at: String,
    ) -> Self {
        Self {
            number: item.number.clone(),
            code,
            service_name: item.service_name.clone(),
            range: item.range.clone(),
            message: item.message.clone(),
            revenue: item.revenue.clone(),
            groups,
            sent_at,
        }
    }
}

/// Acknowledgement returned by a delivery adapter.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeliveryReceipt {
    pub message_id: Option<i64>,
}

// The API is loose about scalar types (numbers sometimes arrive as JSON
// numbers, sometimes as strings). Accept both.
fn stringy<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
