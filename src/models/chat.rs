use serde::{ Serialize, Deserialize };
use std::fmt;

pub const DEFAULT_SHOP_ID: &str = "default-shop";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat turn. `timestamp` is epoch milliseconds on the local clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }
}

/// The local cache entry, in the exact JSON shape the widget has always written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedConversation {
    pub conversation_id: String,
    #[serde(default = "default_shop_id")]
    pub shop_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Last local save, epoch milliseconds.
    pub timestamp: i64,
}

fn default_shop_id() -> String {
    DEFAULT_SHOP_ID.to_string()
}

/// A message as listed by the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_uses_camel_case_keys() {
        let entry = CachedConversation {
            conversation_id: "c-1".into(),
            shop_id: "shop-a".into(),
            customer_id: None,
            conversation_history: vec![ChatMessage::new(Role::User, "hi", 5)],
            timestamp: 42,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["conversationId"], "c-1");
        assert_eq!(value["shopId"], "shop-a");
        assert!(value["customerId"].is_null());
        assert_eq!(value["conversationHistory"][0]["role"], "user");
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let raw = r#"{"role":"system","content":"x","timestamp":1}"#;
        assert!(serde_json::from_str::<ChatMessage>(raw).is_err());
    }

    #[test]
    fn legacy_entry_without_message_timestamps_still_parses() {
        let raw = r#"{
            "conversationId": "abc",
            "conversationHistory": [{"role":"assistant","content":"Hello!"}],
            "timestamp": 10
        }"#;
        let entry: CachedConversation = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.shop_id, DEFAULT_SHOP_ID);
        assert_eq!(entry.conversation_history[0].timestamp, 0);
    }
}
