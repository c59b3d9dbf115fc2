mod memory;
mod supabase;

pub use memory::MemoryHistoryStore;
pub use supabase::SupabaseHistoryStore;

use async_trait::async_trait;
use log::info;
use serde_json::{ Map, Value as JsonValue };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ Role, StoredMessage };

/// Number of messages fetched when rehydrating a conversation.
pub const HISTORY_FETCH_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("history store responded with status {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },
    #[error("history store returned an unexpected payload: {0}")]
    Payload(String),
    #[error("customer ID is required")]
    MissingCustomer,
    #[error("conversation '{0}' not found")]
    NotFound(String),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

pub type Preferences = Map<String, JsonValue>;

/// The remote, authoritative conversation store.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Creates a conversation and returns its store-issued ID.
    async fn create_conversation(
        &self,
        shop_id: &str,
        customer_id: Option<&str>
    ) -> Result<String, HistoryError>;

    /// Appends a message and returns its ID.
    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<String, HistoryError>;

    /// Lists messages oldest first, at most `limit`.
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Vec<StoredMessage>, HistoryError>;

    /// Merges `preferences` into the customer's stored preferences and returns the result.
    async fn save_preferences(
        &self,
        customer_id: &str,
        preferences: Preferences
    ) -> Result<Preferences, HistoryError>;

    /// Returns the customer's preferences, empty when none were saved.
    async fn get_preferences(&self, customer_id: &str) -> Result<Preferences, HistoryError>;
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "supabase" => {
            let store = SupabaseHistoryStore::new(&args.supabase_url, &args.supabase_key)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    info!("Conversations will be stored in: {}", args.history_type);
    create_history_store(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn rejects_unknown_store_type() {
        let args = Args::parse_from(["shop-assistant", "--history-type", "redis"]);
        let err = create_history_store(&args).err().unwrap();
        assert!(err.to_string().contains("Unsupported history store type"));
    }

    #[test]
    fn supabase_requires_credentials() {
        let args = Args::parse_from([
            "shop-assistant",
            "--history-type",
            "supabase",
            "--supabase-url",
            "",
            "--supabase-key",
            "",
        ]);
        assert!(create_history_store(&args).is_err());
    }
}
