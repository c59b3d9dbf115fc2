use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;
use crate::history::{ HistoryError, HistoryStore, Preferences };
use crate::models::chat::{ Role, StoredMessage };

struct StoredConversation {
    _shop_id: String,
    _customer_id: Option<String>,
    messages: Vec<StoredMessage>,
    last_message_at: Option<String>,
}

/// Process-local store. Conversations vanish on exit.
#[derive(Default)]
pub struct MemoryHistoryStore {
    conversations: Mutex<HashMap<String, StoredConversation>>,
    preferences: Mutex<HashMap<String, Preferences>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a conversation under a caller-chosen ID, e.g. one read from a cookie.
    pub fn insert_conversation(&self, conversation_id: &str, shop_id: &str) {
        if let Ok(mut conversations) = self.conversations.lock() {
            conversations.insert(conversation_id.to_string(), StoredConversation {
                _shop_id: shop_id.to_string(),
                _customer_id: None,
                messages: Vec::new(),
                last_message_at: None,
            });
        }
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .lock()
            .ok()
            .and_then(|c| c.get(conversation_id).map(|conv| conv.messages.len()))
            .unwrap_or(0)
    }

    pub fn last_message_at(&self, conversation_id: &str) -> Option<String> {
        self.conversations
            .lock()
            .ok()
            .and_then(|c| c.get(conversation_id).and_then(|conv| conv.last_message_at.clone()))
    }
}

fn poisoned() -> HistoryError {
    HistoryError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_conversation(
        &self,
        shop_id: &str,
        customer_id: Option<&str>
    ) -> Result<String, HistoryError> {
        let id = Uuid::new_v4().to_string();
        let mut conversations = self.conversations.lock().map_err(|_| poisoned())?;
        conversations.insert(id.clone(), StoredConversation {
            _shop_id: shop_id.to_string(),
            _customer_id: customer_id.map(str::to_string),
            messages: Vec::new(),
            last_message_at: None,
        });
        Ok(id)
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<String, HistoryError> {
        let mut conversations = self.conversations.lock().map_err(|_| poisoned())?;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| HistoryError::NotFound(conversation_id.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conversation.messages.push(StoredMessage {
            id: Some(id.clone()),
            role,
            content: content.to_string(),
            created_at: Some(now.clone()),
        });
        conversation.last_message_at = Some(now);
        Ok(id)
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let conversations = self.conversations.lock().map_err(|_| poisoned())?;
        let Some(conversation) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let skip = conversation.messages.len().saturating_sub(limit);
        Ok(conversation.messages[skip..].to_vec())
    }

    async fn save_preferences(
        &self,
        customer_id: &str,
        preferences: Preferences
    ) -> Result<Preferences, HistoryError> {
        if customer_id.is_empty() {
            return Err(HistoryError::MissingCustomer);
        }
        let mut all = self.preferences.lock().map_err(|_| poisoned())?;
        let entry = all.entry(customer_id.to_string()).or_default();
        entry.extend(preferences);
        Ok(entry.clone())
    }

    async fn get_preferences(&self, customer_id: &str) -> Result<Preferences, HistoryError> {
        if customer_id.is_empty() {
            return Err(HistoryError::MissingCustomer);
        }
        let all = self.preferences.lock().map_err(|_| poisoned())?;
        Ok(all.get(customer_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn messages_come_back_oldest_first_and_bounded() {
        let store = MemoryHistoryStore::new();
        let id = store.create_conversation("shop-a", None).await.unwrap();
        for i in 0..5 {
            store.add_message(&id, Role::User, &format!("m{}", i)).await.unwrap();
        }
        let all = store.get_messages(&id, 50).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");

        let recent = store.get_messages(&id, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
        assert!(store.last_message_at(&id).is_some());
    }

    #[tokio::test]
    async fn add_to_unknown_conversation_fails() {
        let store = MemoryHistoryStore::new();
        let err = store.add_message("nope", Role::User, "hi").await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
        assert!(store.get_messages("nope", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preferences_upsert() {
        let store = MemoryHistoryStore::new();
        assert!(store.get_preferences("cust-1").await.unwrap().is_empty());

        let mut first = Preferences::new();
        first.insert("size".into(), json!("M"));
        store.save_preferences("cust-1", first).await.unwrap();

        let mut second = Preferences::new();
        second.insert("colour".into(), json!("blue"));
        let merged = store.save_preferences("cust-1", second).await.unwrap();
        assert_eq!(merged.get("size"), Some(&json!("M")));
        assert_eq!(merged.get("colour"), Some(&json!("blue")));

        let err = store.get_preferences("").await.unwrap_err();
        assert!(matches!(err, HistoryError::MissingCustomer));
    }
}
