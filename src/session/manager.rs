use chrono::{ DateTime, Duration };
use log::{ debug, error, info, warn };
use std::sync::{ Arc, Mutex, MutexGuard };
use crate::cache::cookie::{ Cookie, CookieJar, COOKIE_NAME };
use crate::cache::{ LocalCache, STORAGE_KEY };
use crate::history::{ HistoryError, HistoryStore, HISTORY_FETCH_LIMIT };
use crate::models::chat::{ CachedConversation, ChatMessage, Role, StoredMessage, DEFAULT_SHOP_ID };
use crate::session::clock::{ Clock, SystemClock };
use crate::widget::view::{ ChatView, MessageElement };

/// Cached state older than this is never resumed.
pub const FRESHNESS_WINDOW_HOURS: i64 = 24;

/// Outcome of looking for a conversation to resume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Fresh cache entry; history is usable as is.
    Resumed(CachedConversation),
    /// Only the cookie survived; history must be fetched from the store.
    ResumedPartial {
        conversation_id: String,
    },
    None,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationState {
    pub conversation_id: Option<String>,
    pub shop_id: String,
    pub customer_id: Option<String>,
    pub history: Vec<ChatMessage>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            shop_id: DEFAULT_SHOP_ID.to_string(),
            customer_id: None,
            history: Vec::new(),
        }
    }
}

/// Keeps one conversation in step across memory, the local cache, the cookie and the remote store.
pub struct ConversationManager {
    state: Mutex<ConversationState>,
    store: Arc<dyn HistoryStore>,
    view: Arc<dyn ChatView>,
    cache: Arc<dyn LocalCache>,
    cookies: Arc<dyn CookieJar>,
    clock: Arc<dyn Clock>,
    page_host: String,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        view: Arc<dyn ChatView>,
        cache: Arc<dyn LocalCache>,
        cookies: Arc<dyn CookieJar>,
        page_host: impl Into<String>
    ) -> Self {
        Self {
            state: Mutex::new(ConversationState::default()),
            store,
            view,
            cache,
            cookies,
            clock: Arc::new(SystemClock),
            page_host: page_host.into(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConversationState {
        self.lock_state().clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock_state().conversation_id.clone()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock_state().history.clone()
    }

    pub fn view(&self) -> &Arc<dyn ChatView> {
        &self.view
    }

    fn read_cache(&self) -> Option<CachedConversation> {
        let raw = match self.cache.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return None;
            }
            Err(e) => {
                warn!("Could not read cached conversation: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<CachedConversation>(&raw) {
            Ok(entry) if !entry.conversation_id.is_empty() => Some(entry),
            Ok(_) => {
                debug!("Cached conversation has no ID, ignoring");
                None
            }
            Err(e) => {
                warn!("Cached conversation is malformed, ignoring: {}", e);
                None
            }
        }
    }

    /// Picks the conversation to resume: fresh cache entry first, then the cookie.
    /// Adopts whatever it finds into memory.
    pub fn resolve_on_load(&self) -> Resolution {
        let now = self.clock.now();
        let mut stale_id = None;

        if let Some(entry) = self.read_cache() {
            let window = Duration::hours(FRESHNESS_WINDOW_HOURS).num_milliseconds();
            // an age that overflows is as good as stale
            let age = now.timestamp_millis().checked_sub(entry.timestamp);
            if !matches!(age, Some(age) if age <= window) {
                match age {
                    Some(age) =>
                        info!(
                            "Cached conversation {} is stale ({} minutes old), starting over",
                            entry.conversation_id,
                            age / 60_000
                        ),
                    None =>
                        info!(
                            "Cached conversation {} has an unusable timestamp ({}), starting over",
                            entry.conversation_id,
                            entry.timestamp
                        ),
                }
                if let Err(e) = self.cache.remove(STORAGE_KEY) {
                    warn!("Could not drop stale cache entry: {}", e);
                }
                stale_id = Some(entry.conversation_id);
            } else {
                info!(
                    "Resuming conversation {} from local cache ({} messages)",
                    entry.conversation_id,
                    entry.conversation_history.len()
                );
                let mut state = self.lock_state();
                *state = ConversationState {
                    conversation_id: Some(entry.conversation_id.clone()),
                    shop_id: if entry.shop_id.is_empty() {
                        DEFAULT_SHOP_ID.to_string()
                    } else {
                        entry.shop_id.clone()
                    },
                    customer_id: entry.customer_id.clone(),
                    history: entry.conversation_history.clone(),
                };
                return Resolution::Resumed(entry);
            }
        }

        match self.cookies.get(COOKIE_NAME, now) {
            Ok(Some(conversation_id)) if stale_id.as_deref() != Some(conversation_id.as_str()) => {
                info!("Found conversation ID in cookie: {}", conversation_id);
                let mut state = self.lock_state();
                state.conversation_id = Some(conversation_id.clone());
                state.history.clear();
                Resolution::ResumedPartial { conversation_id }
            }
            Ok(Some(conversation_id)) => {
                debug!("Cookie still points at stale conversation {}, ignoring", conversation_id);
                Resolution::None
            }
            Ok(None) => Resolution::None,
            Err(e) => {
                warn!("Could not read conversation cookie: {}", e);
                Resolution::None
            }
        }
    }

    /// Asks the store for a new conversation. `None` means the session runs unsaved.
    pub async fn create_new(&self, shop_id: &str, customer_id: Option<&str>) -> Option<String> {
        let shop_id = if shop_id.trim().is_empty() {
            warn!("No shop ID available, using '{}'", DEFAULT_SHOP_ID);
            DEFAULT_SHOP_ID
        } else {
            shop_id
        };

        match self.store.create_conversation(shop_id, customer_id).await {
            Ok(conversation_id) => {
                info!("Created conversation {} for shop {}", conversation_id, shop_id);
                {
                    let mut state = self.lock_state();
                    *state = ConversationState {
                        conversation_id: Some(conversation_id.clone()),
                        shop_id: shop_id.to_string(),
                        customer_id: customer_id.map(str::to_string),
                        history: Vec::new(),
                    };
                }
                self.persist();
                Some(conversation_id)
            }
            Err(e) => {
                error!("Failed to create conversation, messages will not be saved: {}", e);
                let mut state = self.lock_state();
                state.conversation_id = None;
                state.shop_id = shop_id.to_string();
                state.customer_id = customer_id.map(str::to_string);
                None
            }
        }
    }

    /// Appends a turn, draws it, then writes it to the cache, cookie and store.
    pub async fn append_and_persist(&self, role: Role, content: &str) -> ChatMessage {
        let message = ChatMessage::new(role, content, self.clock.now().timestamp_millis());
        self.lock_state().history.push(message.clone());
        self.commit(&message).await;
        message
    }

    /// Appends the greeting only when nothing has been said yet and nothing is on screen.
    /// Check and append happen under one lock, so racing callers add it once.
    pub async fn append_welcome_if_empty(&self, greeting: &str) -> bool {
        let message = {
            let mut state = self.lock_state();
            if !state.history.is_empty() || self.view.has_assistant_message() {
                debug!("Conversation already has content, skipping welcome message");
                return false;
            }
            let message = ChatMessage::new(
                Role::Assistant,
                greeting,
                self.clock.now().timestamp_millis()
            );
            state.history.push(message.clone());
            message
        };
        self.commit(&message).await;
        true
    }

    async fn commit(&self, message: &ChatMessage) {
        self.view.append_message(MessageElement::from_message(message));
        if !self.persist() {
            return;
        }
        let Some(conversation_id) = self.conversation_id() else {
            return;
        };
        if let Err(e) = self.store.add_message(&conversation_id, message.role, &message.content).await {
            error!("Failed to save {} message to conversation {}: {}", message.role, conversation_id, e);
        }
    }

    /// Draws a message without recording it anywhere.
    pub fn render_transient(&self, role: Role, content: &str) -> ChatMessage {
        let message = ChatMessage::new(role, content, self.clock.now().timestamp_millis());
        self.view.append_message(MessageElement::from_message(&message));
        message
    }

    /// Replaces history with the store's latest messages. Returns how many were loaded.
    pub async fn fetch_remote_history(&self, conversation_id: &str) -> Result<usize, HistoryError> {
        let stored = match self.store.get_messages(conversation_id, HISTORY_FETCH_LIMIT).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to fetch history for conversation {}: {}", conversation_id, e);
                return Err(e);
            }
        };

        if stored.is_empty() {
            info!("Conversation {} has no stored messages", conversation_id);
            return Ok(0);
        }

        let fallback = self.clock.now().timestamp_millis();
        let history: Vec<ChatMessage> = stored
            .into_iter()
            .map(|m| stored_to_chat(m, fallback))
            .collect();
        let count = history.len();

        {
            let mut state = self.lock_state();
            state.conversation_id = Some(conversation_id.to_string());
            state.history = history;
        }
        self.render_history();
        self.persist();
        info!("Loaded {} messages for conversation {}", count, conversation_id);
        Ok(count)
    }

    /// Redraws every message in order.
    pub fn render_history(&self) {
        let history = self.history();
        self.view.clear_messages();
        for message in &history {
            self.view.append_message(MessageElement::from_message(message));
        }
    }

    /// Writes the full snapshot to the cache and the ID to the cookie.
    /// Returns false when there is no conversation ID to save under.
    pub fn persist(&self) -> bool {
        let state = self.state();
        let Some(conversation_id) = state.conversation_id else {
            warn!("No conversation ID, cannot save conversation");
            return false;
        };
        let now = self.clock.now();

        let entry = CachedConversation {
            conversation_id: conversation_id.clone(),
            shop_id: state.shop_id,
            customer_id: state.customer_id,
            conversation_history: state.history,
            timestamp: now.timestamp_millis(),
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = self.cache.set(STORAGE_KEY, &json) {
                    error!("Error saving conversation to local cache: {}", e);
                }
            }
            Err(e) => error!("Error serializing conversation: {}", e),
        }

        let cookie = Cookie::conversation(&conversation_id, &self.page_host, now);
        if let Err(e) = self.cookies.set(cookie) {
            error!("Error setting conversation cookie: {}", e);
        }
        debug!("Saved conversation {} to local cache and cookie", conversation_id);
        true
    }

    /// Forgets the conversation everywhere local. The remote copy is left alone.
    pub fn reset(&self) {
        {
            let mut state = self.lock_state();
            state.conversation_id = None;
            state.history.clear();
        }
        if let Err(e) = self.cache.remove(STORAGE_KEY) {
            warn!("Could not clear cached conversation: {}", e);
        }
        if let Err(e) = self.cookies.set(Cookie::expired(COOKIE_NAME, &self.page_host)) {
            warn!("Could not expire conversation cookie: {}", e);
        }
        self.view.clear_messages();
        info!("Conversation reset");
    }
}

fn stored_to_chat(message: StoredMessage, fallback_millis: i64) -> ChatMessage {
    let timestamp = message.created_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or(fallback_millis);
    ChatMessage::new(message.role, message.content, timestamp)
}
