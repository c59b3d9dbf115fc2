use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::{ info, warn };

pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Hello! I'm your shopping assistant. How can I help you today?";

pub const DEFAULT_ERROR_PREFIX: &str =
    "Sorry, I encountered an error. Please try again later. Technical details: ";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful shopping assistant for an online store. Your purpose is to help customers find products, answer questions about products, and help them make purchases.

- Always respond in British English, using a friendly and helpful tone.
- When recommending products, be specific and reference their attributes.
- If asked about adding products to the cart, respond positively and confirm the action.
- If a customer asks for help finding a product, ask clarifying questions about what they're looking for.
- Don't make up information about products that aren't in the provided context.
- Keep responses concise but informative.

When asked about product details, price, or availability, only use the information provided in the context. If the information isn't available, ask the customer for more details or suggest searching for specific products.";

#[derive(Debug)]
pub enum PromptError {
    EmptyField(&'static str),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::EmptyField(key) => write!(f, "Prompt field '{}' must not be empty", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Texts the assistant speaks with. Fields missing from a prompts file keep their defaults.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantPrompts {
    pub system_prompt: String,
    pub welcome_message: String,
    pub error_prefix: String,
}

impl Default for AssistantPrompts {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            error_prefix: DEFAULT_ERROR_PREFIX.to_string(),
        }
    }
}

impl AssistantPrompts {
    fn validate(&self) -> Result<(), PromptError> {
        if self.system_prompt.trim().is_empty() {
            return Err(PromptError::EmptyField("system_prompt"));
        }
        if self.welcome_message.trim().is_empty() {
            return Err(PromptError::EmptyField("welcome_message"));
        }
        Ok(())
    }

    pub fn error_text(&self, detail: &str) -> String {
        format!("{}{}", self.error_prefix, detail)
    }
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<AssistantPrompts>, PromptError> {
    let file_content = fs::read_to_string(&path)?;
    let prompts: AssistantPrompts = serde_json::from_str(&file_content)?;
    prompts.validate()?;
    info!("Loaded prompts from {}", path.as_ref().display());
    Ok(Arc::new(prompts))
}

/// Defaults when no path is configured or the file cannot be used.
pub fn load_prompts_or_default(path: Option<&str>) -> Arc<AssistantPrompts> {
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) =>
            load_prompts(path).unwrap_or_else(|e| {
                warn!("Failed to load prompts file '{}': {}. Using defaults", path, e);
                Arc::new(AssistantPrompts::default())
            }),
        None => Arc::new(AssistantPrompts::default()),
    }
}
