use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, RequestBuilder, Response };
use serde::Deserialize;
use serde_json::{ json, Value as JsonValue };
use crate::history::{ HistoryError, HistoryStore, Preferences };
use crate::models::chat::{ Role, StoredMessage };

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const USER_PREFERENCES: &str = "user_preferences";

/// Talks to the hosted Postgres through its PostgREST endpoint.
pub struct SupabaseHistoryStore {
    http: HttpClient,
    rest_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl SupabaseHistoryStore {
    pub fn new(url: &str, api_key: &str) -> Result<Self, HistoryError> {
        if url.trim().is_empty() || api_key.trim().is_empty() {
            return Err(HistoryError::Unavailable("missing Supabase credentials".to_string()));
        }
        let parsed = url::Url
            ::parse(url)
            .map_err(|e| HistoryError::Unavailable(format!("invalid Supabase URL '{}': {}", url, e)))?;

        Ok(Self {
            http: HttpClient::new(),
            rest_url: format!("{}/rest/v1", parsed.as_str().trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn insert(&self, table: &str, row: JsonValue) -> RequestBuilder {
        self.request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&json!([row]))
    }

    async fn rows(response: Response) -> Result<Vec<JsonValue>, HistoryError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json
                ::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(text);
            return Err(HistoryError::Status { status: status.as_u16(), message });
        }
        Ok(response.json::<Vec<JsonValue>>().await?)
    }

    async fn single_row(response: Response) -> Result<JsonValue, HistoryError> {
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HistoryError::Payload("expected one row, got none".to_string()))
    }

    async fn find_preferences(&self, customer_id: &str) -> Result<Option<Preferences>, HistoryError> {
        let response = self
            .request(reqwest::Method::GET, USER_PREFERENCES)
            .query(&[("select", "*".to_string()), ("customer_id", format!("eq.{}", customer_id))])
            .send().await?;
        let row = Self::rows(response).await?.into_iter().next();
        Ok(row.and_then(|r| r.as_object().cloned()))
    }
}

/// Row IDs may be UUID strings or bigint columns.
fn row_id(row: &JsonValue) -> Result<String, HistoryError> {
    match row.get("id") {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => Err(HistoryError::Payload(format!("row without id: {}", row))),
    }
}

#[async_trait]
impl HistoryStore for SupabaseHistoryStore {
    async fn create_conversation(
        &self,
        shop_id: &str,
        customer_id: Option<&str>
    ) -> Result<String, HistoryError> {
        let response = self
            .insert(CONVERSATIONS, json!({ "shop_id": shop_id, "customer_id": customer_id }))
            .send().await?;
        let row = Self::single_row(response).await?;
        row_id(&row)
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<String, HistoryError> {
        let response = self
            .insert(
                MESSAGES,
                json!({
                "conversation_id": conversation_id,
                "role": role.as_str(),
                "content": content,
            })
            )
            .send().await?;
        let id = row_id(&Self::single_row(response).await?)?;

        let touched = self
            .request(reqwest::Method::PATCH, CONVERSATIONS)
            .query(&[("id", format!("eq.{}", conversation_id))])
            .json(&json!({ "last_message_at": Utc::now().to_rfc3339() }))
            .send().await;
        match touched {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Failed to update last_message_at for {}: {}", conversation_id, resp.status()),
            Err(e) => warn!("Failed to update last_message_at for {}: {}", conversation_id, e),
        }

        debug!("Stored message {} in conversation {}", id, conversation_id);
        Ok(id)
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let response = self
            .request(reqwest::Method::GET, MESSAGES)
            .query(
                &[
                    ("select", "*".to_string()),
                    ("conversation_id", format!("eq.{}", conversation_id)),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ]
            )
            .send().await?;

        let mut messages = Vec::new();
        for row in Self::rows(response).await? {
            match serde_json::from_value::<StoredMessage>(normalize_id(row)) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping unreadable message row: {}", e),
            }
        }
        // Newest `limit` were fetched; hand them back oldest first.
        messages.reverse();
        Ok(messages)
    }

    async fn save_preferences(
        &self,
        customer_id: &str,
        preferences: Preferences
    ) -> Result<Preferences, HistoryError> {
        if customer_id.is_empty() {
            return Err(HistoryError::MissingCustomer);
        }

        let response = if self.find_preferences(customer_id).await?.is_some() {
            let mut update = preferences;
            update.insert("updated_at".into(), JsonValue::String(Utc::now().to_rfc3339()));
            self.request(reqwest::Method::PATCH, USER_PREFERENCES)
                .header("Prefer", "return=representation")
                .query(&[("customer_id", format!("eq.{}", customer_id))])
                .json(&update)
                .send().await?
        } else {
            let mut row = preferences;
            row.insert("customer_id".into(), JsonValue::String(customer_id.to_string()));
            self.insert(USER_PREFERENCES, JsonValue::Object(row)).send().await?
        };

        let row = Self::single_row(response).await?;
        row.as_object()
            .cloned()
            .ok_or_else(|| HistoryError::Payload(format!("preferences row is not an object: {}", row)))
    }

    async fn get_preferences(&self, customer_id: &str) -> Result<Preferences, HistoryError> {
        if customer_id.is_empty() {
            return Err(HistoryError::MissingCustomer);
        }
        Ok(self.find_preferences(customer_id).await?.unwrap_or_default())
    }
}

fn normalize_id(mut row: JsonValue) -> JsonValue {
    if let Some(JsonValue::Number(n)) = row.get("id").cloned() {
        row["id"] = JsonValue::String(n.to_string());
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_url_is_derived_from_project_url() {
        let store = SupabaseHistoryStore::new("https://xyz.supabase.co/", "key").unwrap();
        assert_eq!(store.rest_url, "https://xyz.supabase.co/rest/v1");
    }

    #[test]
    fn missing_or_invalid_credentials_are_rejected() {
        assert!(SupabaseHistoryStore::new("", "key").is_err());
        assert!(SupabaseHistoryStore::new("https://xyz.supabase.co", " ").is_err());
        assert!(SupabaseHistoryStore::new("not a url", "key").is_err());
    }

    #[test]
    fn row_ids_accept_strings_and_numbers() {
        assert_eq!(row_id(&json!({"id": "a-b"})).unwrap(), "a-b");
        assert_eq!(row_id(&json!({"id": 17})).unwrap(), "17");
        assert!(row_id(&json!({"name": "x"})).is_err());
    }

    #[test]
    fn numeric_message_ids_deserialize() {
        let row = json!({"id": 3, "role": "assistant", "content": "hi", "created_at": "2025-01-01T00:00:00Z"});
        let message: StoredMessage = serde_json::from_value(normalize_id(row)).unwrap();
        assert_eq!(message.id.as_deref(), Some("3"));
        assert_eq!(message.role, Role::Assistant);
    }
}
