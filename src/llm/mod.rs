pub mod context;

use async_trait::async_trait;
use log::{ debug, error };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Role };

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MESSAGES_ROUTE: &str = "/v1/messages";
pub const PROXY_ROUTE: &str = "/api/claude";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

/// `{ "error": { "message": ... } }`, used by the API and by the proxy.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: ErrorDetail { message: message.into() } }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Api(String),
    #[error("API responded with status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("Invalid JSON response from server")]
    InvalidJson,
    #[error("Invalid response format from API")]
    InvalidFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: Vec<WireMessage>) -> Result<Completion, LlmError>;
}

/// Posts to the messages endpoint, either through the proxy (no key) or directly.
pub struct ClaudeClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    system: Option<String>,
}

impl ClaudeClient {
    pub fn direct(base_url: &str, api_key: &str) -> Self {
        Self::with_endpoint(format!("{}{}", base_url.trim_end_matches('/'), MESSAGES_ROUTE), Some(api_key.to_string()))
    }

    pub fn via_proxy(app_url: &str) -> Self {
        Self::with_endpoint(format!("{}{}", app_url.trim_end_matches('/'), PROXY_ROUTE), None)
    }

    fn with_endpoint(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
        }
    }

    /// Proxy when a proxy URL is configured, otherwise the API with the configured key.
    pub fn from_args(args: &Args) -> Self {
        let client = match args.chat_proxy_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(proxy) => Self::via_proxy(proxy),
            None => Self::direct(&args.claude_base_url, &args.claude_api_key),
        };
        client.model(&args.claude_model).max_tokens(args.claude_max_tokens)
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_request(&self, messages: Vec<WireMessage>) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages,
            system: self.system.clone(),
        }
    }
}

/// Maps a status and raw body to the assistant text or a typed error.
pub fn parse_completion(status: u16, body: &str) -> Result<Completion, LlmError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| LlmError::InvalidJson)?;

    if !(200..300).contains(&status) {
        if let Ok(envelope) = serde_json::from_value::<ErrorEnvelope>(value.clone()) {
            return Err(LlmError::Api(envelope.error.message));
        }
        return Err(LlmError::Status { status, body: value.to_string() });
    }

    let response: MessagesResponse = serde_json
        ::from_value(value)
        .map_err(|_| LlmError::InvalidFormat)?;
    let text = response.content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .filter(|t| !t.is_empty())
        .ok_or(LlmError::InvalidFormat)?;

    Ok(Completion { text, message_id: response.id })
}

#[async_trait]
impl ChatClient for ClaudeClient {
    async fn complete(&self, messages: Vec<WireMessage>) -> Result<Completion, LlmError> {
        let request = self.build_request(messages);
        debug!("Sending {} messages to {}", request.messages.len(), self.endpoint);

        let mut req = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key).header("anthropic-version", ANTHROPIC_VERSION);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!("Model endpoint responded with status {}", status);

        parse_completion(status, &body).map_err(|e| {
            error!("Model request failed: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let client = ClaudeClient::via_proxy("https://app.example.com/");
        assert_eq!(client.endpoint(), "https://app.example.com/api/claude");
        let request = client.build_request(vec![WireMessage { role: Role::User, content: "hi".into() }]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({
            "model": DEFAULT_MODEL,
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let direct = ClaudeClient::direct("https://api.anthropic.com", "k").system("be nice");
        assert_eq!(direct.endpoint(), "https://api.anthropic.com/v1/messages");
        let value = serde_json::to_value(direct.build_request(vec![])).unwrap();
        assert_eq!(value["system"], "be nice");
    }

    #[test]
    fn parses_success() {
        let body = r#"{"id":"msg_1","content":[{"type":"text","text":"Hello"}]}"#;
        let completion = parse_completion(200, body).unwrap();
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.message_id.as_deref(), Some("msg_1"));
    }

    #[test]
    fn maps_error_envelope_and_bad_bodies() {
        let err = parse_completion(400, r#"{"error":{"message":"API key is required"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "API key is required");

        let err = parse_completion(502, r#"{"oops":true}"#).unwrap_err();
        assert_eq!(err.to_string(), r#"API responded with status 502: {"oops":true}"#);

        let err = parse_completion(200, "<html>").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON response from server");

        let err = parse_completion(200, r#"{"content":[]}"#).unwrap_err();
        assert_eq!(err.to_string(), "Invalid response format from API");
    }
}
