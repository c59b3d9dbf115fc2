pub mod format;
pub mod view;

use log::{ debug, info, warn };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use tokio::sync::{ Mutex as AsyncMutex, OnceCell };
use crate::cache::cookie::CookieJar;
use crate::cache::LocalCache;
use crate::config::AssistantPrompts;
use crate::history::HistoryStore;
use crate::llm::context::{ extract_search_terms, format_message_with_context, is_product_search, ShoppingContext };
use crate::llm::{ ChatClient, WireMessage };
use crate::models::chat::{ ChatMessage, Role };
use crate::models::commerce::{ Cart, CartLineInput };
use crate::session::{ Clock, ConversationManager, Resolution };
use crate::storefront::{ Storefront, StorefrontError };
use view::{ ChatView, Container, ProductCard, WidgetError };

pub const PRODUCT_SEARCH_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty input, or a turn is already in flight.
    Ignored,
    Replied(ChatMessage),
    /// The model call failed; the error bubble was shown but not saved.
    Failed(String),
}

/// Everything a widget needs besides the view it draws into.
#[derive(Clone)]
pub struct WidgetParts {
    pub store: Arc<dyn HistoryStore>,
    pub cache: Arc<dyn LocalCache>,
    pub cookies: Arc<dyn CookieJar>,
    pub client: Arc<dyn ChatClient>,
    pub storefront: Option<Arc<dyn Storefront>>,
    pub prompts: Arc<AssistantPrompts>,
    pub page_host: String,
    pub shop_id: String,
    pub customer_id: Option<String>,
    pub clock: Option<Arc<dyn Clock>>,
}

/// Clears the loading flag and re-enables input however the turn ends.
struct LoadingGuard<'a> {
    flag: &'a AtomicBool,
    view: &'a Arc<dyn ChatView>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.view.set_loading(false);
    }
}

pub struct ChatWidget {
    manager: ConversationManager,
    client: Arc<dyn ChatClient>,
    storefront: Option<Arc<dyn Storefront>>,
    prompts: Arc<AssistantPrompts>,
    shop_id: String,
    customer_id: Option<String>,
    loading: AtomicBool,
    minimized: AtomicBool,
    cart_id: AsyncMutex<Option<String>>,
    initialized: OnceCell<Resolution>,
}

impl ChatWidget {
    pub fn new(view: Arc<dyn ChatView>, parts: WidgetParts) -> Self {
        let mut manager = ConversationManager::new(
            parts.store,
            view,
            parts.cache,
            parts.cookies,
            parts.page_host
        );
        if let Some(clock) = parts.clock {
            manager = manager.with_clock(clock);
        }
        Self {
            manager,
            client: parts.client,
            storefront: parts.storefront,
            prompts: parts.prompts,
            shop_id: parts.shop_id,
            customer_id: parts.customer_id,
            loading: AtomicBool::new(false),
            minimized: AtomicBool::new(false),
            cart_id: AsyncMutex::new(None),
            initialized: OnceCell::new(),
        }
    }

    pub fn manager(&self) -> &ConversationManager {
        &self.manager
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized.load(Ordering::SeqCst)
    }

    /// Resolves or creates the conversation and shows the greeting when due. Runs once.
    pub async fn initialize(&self) -> Resolution {
        self.initialized.get_or_init(|| self.run_initialization()).await.clone()
    }

    async fn run_initialization(&self) -> Resolution {
        let resolution = self.manager.resolve_on_load();
        match &resolution {
            Resolution::Resumed(entry) => {
                debug!("Rendering {} cached messages", entry.conversation_history.len());
                self.manager.render_history();
            }
            Resolution::ResumedPartial { conversation_id } => {
                if let Err(e) = self.manager.fetch_remote_history(conversation_id).await {
                    warn!("Continuing conversation {} without its history: {}", conversation_id, e);
                }
            }
            Resolution::None => {
                if self.manager.create_new(&self.shop_id, self.customer_id.as_deref()).await.is_none() {
                    warn!("Chat is running without a saved conversation");
                }
            }
        }
        self.manager.append_welcome_if_empty(&self.prompts.welcome_message).await;
        info!("Chat widget initialized");
        resolution
    }

    /// One user turn: record the message, ask the model, record the reply.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }
        if self.loading.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("A message is already being processed, ignoring send");
            return SendOutcome::Ignored;
        }
        let view = self.manager.view();
        view.set_loading(true);
        let _guard = LoadingGuard { flag: &self.loading, view };

        self.manager.append_and_persist(Role::User, text).await;
        let context = self.shopping_context(text).await;

        let mut messages: Vec<WireMessage> = self.manager.history().iter().map(WireMessage::from).collect();
        if !context.is_empty() {
            if let Some(last) = messages.last_mut() {
                last.content = format_message_with_context(text, &context);
            }
        }

        match self.client.complete(messages).await {
            Ok(completion) => {
                let reply = self.manager.append_and_persist(Role::Assistant, &completion.text).await;
                SendOutcome::Replied(reply)
            }
            Err(e) => {
                warn!("Assistant reply failed: {}", e);
                let detail = e.to_string();
                self.manager.render_transient(Role::Assistant, &self.prompts.error_text(&detail));
                SendOutcome::Failed(detail)
            }
        }
    }

    async fn shopping_context(&self, text: &str) -> ShoppingContext {
        let Some(storefront) = &self.storefront else {
            return ShoppingContext::default();
        };
        if !is_product_search(text) {
            return ShoppingContext::default();
        }

        let terms = extract_search_terms(text);
        let query = if terms.is_empty() { text.to_string() } else { terms };
        let products = match storefront.search_products(&query, PRODUCT_SEARCH_LIMIT).await {
            Ok(products) => products,
            Err(e) => {
                warn!("Product search for '{}' failed: {}", query, e);
                Vec::new()
            }
        };
        if !products.is_empty() {
            let cards: Vec<ProductCard> = products.iter().map(ProductCard::from_product).collect();
            self.manager.view().show_products(&cards);
        }

        let cart_id = self.cart_id.lock().await.clone();
        let cart = match cart_id {
            Some(id) =>
                storefront
                    .get_cart(&id).await
                    .map_err(|e| warn!("Could not load cart {}: {}", id, e))
                    .ok(),
            None => None,
        };

        ShoppingContext { products, cart }
    }

    /// Adds a variant to the shopper's cart, creating the cart on first use.
    pub async fn add_to_cart(&self, variant_id: &str, quantity: u32) -> Result<Cart, StorefrontError> {
        let view = self.manager.view();
        let result = self.add_line(variant_id, quantity).await;
        match &result {
            Ok(cart) => {
                let items: u32 = cart.lines.iter().map(|l| l.quantity).sum();
                view.show_notice(&format!("Added to cart. Your cart now has {} item(s).", items));
            }
            Err(e) => {
                warn!("Add to cart failed for {}: {}", variant_id, e);
                view.show_notice("Sorry, that item could not be added to your cart.");
            }
        }
        result
    }

    async fn add_line(&self, variant_id: &str, quantity: u32) -> Result<Cart, StorefrontError> {
        let storefront = self.storefront.as_ref().ok_or(StorefrontError::NotConfigured)?;
        let mut cart_id = self.cart_id.lock().await;
        let id = match cart_id.as_ref() {
            Some(id) => id.clone(),
            None => {
                let cart = storefront.create_cart().await?;
                info!("Created cart {}", cart.id);
                *cart_id = Some(cart.id.clone());
                cart.id
            }
        };
        let line = CartLineInput { merchandise_id: variant_id.to_string(), quantity: quantity.max(1) };
        storefront.add_to_cart(&id, &[line]).await
    }

    /// Flips the minimised state; returns the new value.
    pub fn toggle(&self) -> bool {
        let minimized = !self.minimized.fetch_xor(true, Ordering::SeqCst);
        self.manager.view().set_minimized(minimized);
        minimized
    }

    /// Drops the current conversation and starts a fresh one.
    pub async fn reset(&self) -> Option<String> {
        self.manager.reset();
        let conversation_id = self.manager.create_new(&self.shop_id, self.customer_id.as_deref()).await;
        self.manager.append_welcome_if_empty(&self.prompts.welcome_message).await;
        conversation_id
    }
}

/// Owns the page's single widget. Later `setup` calls get the same handle.
#[derive(Default)]
pub struct AssistantSlot {
    widget: OnceCell<Arc<ChatWidget>>,
}

impl AssistantSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<ChatWidget>> {
        self.widget.get().cloned()
    }

    pub async fn setup(&self, container: Container, parts: WidgetParts) -> Result<Arc<ChatWidget>, WidgetError> {
        let widget = self.widget.get_or_try_init(|| async move {
            let view = container.bind()?;
            let widget = Arc::new(ChatWidget::new(view, parts));
            widget.initialize().await;
            Ok::<_, WidgetError>(widget)
        }).await?;
        Ok(widget.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use crate::cache::cookie::MemoryCookieJar;
    use crate::cache::MemoryCache;
    use crate::history::MemoryHistoryStore;
    use crate::llm::{ Completion, LlmError };
    use crate::models::commerce::{ CartLine, Product };
    use crate::widget::view::MemoryView;

    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, String>>>,
        seen: Mutex<Vec<Vec<WireMessage>>>,
    }

    impl ScriptedClient {
        fn replying(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            let replies = replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            Arc::new(Self { replies: Mutex::new(replies), seen: Mutex::default() })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(&self, messages: Vec<WireMessage>) -> Result<Completion, LlmError> {
            self.seen.lock().unwrap().push(messages);
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(Completion { text, message_id: None }),
                Some(Err(e)) => Err(LlmError::Api(e)),
                None => Err(LlmError::InvalidFormat),
            }
        }
    }

    #[derive(Default)]
    struct FakeStorefront {
        queries: Mutex<Vec<String>>,
        lines: Mutex<Vec<CartLine>>,
        carts_created: Mutex<u32>,
    }

    fn mug() -> Product {
        Product {
            id: "gid://shopify/Product/1".into(),
            title: "Mug".into(),
            description: "Stoneware".into(),
            handle: "mug".into(),
            price: "12.00".into(),
            currency_code: "GBP".into(),
            image_url: String::new(),
            image_alt: "Mug".into(),
            variant_id: "gid://shopify/ProductVariant/11".into(),
            available_for_sale: true,
        }
    }

    impl FakeStorefront {
        fn cart(&self) -> Cart {
            Cart {
                id: "cart-1".into(),
                checkout_url: None,
                lines: self.lines.lock().unwrap().clone(),
                estimated_total: None,
            }
        }
    }

    #[async_trait]
    impl Storefront for FakeStorefront {
        async fn search_products(&self, query: &str, _limit: usize) -> Result<Vec<crate::models::commerce::Product>, StorefrontError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(vec![mug()])
        }
        async fn create_cart(&self) -> Result<Cart, StorefrontError> {
            *self.carts_created.lock().unwrap() += 1;
            Ok(self.cart())
        }
        async fn add_to_cart(&self, _cart_id: &str, lines: &[CartLineInput]) -> Result<Cart, StorefrontError> {
            for line in lines {
                self.lines.lock().unwrap().push(CartLine {
                    id: format!("line-{}", line.merchandise_id),
                    quantity: line.quantity,
                    merchandise_id: line.merchandise_id.clone(),
                    merchandise_title: "Default".into(),
                    product_title: "Mug".into(),
                    price: None,
                });
            }
            Ok(self.cart())
        }
        async fn get_cart(&self, _cart_id: &str) -> Result<Cart, StorefrontError> {
            Ok(self.cart())
        }
    }

    fn parts(client: Arc<ScriptedClient>, storefront: Option<Arc<dyn Storefront>>) -> WidgetParts {
        WidgetParts {
            store: Arc::new(MemoryHistoryStore::new()),
            cache: Arc::new(MemoryCache::new()),
            cookies: Arc::new(MemoryCookieJar::new()),
            client,
            storefront,
            prompts: Arc::new(AssistantPrompts::default()),
            page_host: "localhost".into(),
            shop_id: "shop-a".into(),
            customer_id: None,
            clock: None,
        }
    }

    #[tokio::test]
    async fn missing_messages_element_fails_fast() {
        let slot = AssistantSlot::new();
        let client = ScriptedClient::replying(vec![]);
        let err = slot.setup(Container::empty("chat"), parts(client, None)).await.err().unwrap();
        assert_eq!(err, WidgetError::ElementNotFound { container: "chat".into(), element: "messages" });
        assert!(slot.get().is_none());
    }

    #[tokio::test]
    async fn setup_twice_returns_same_widget_and_one_greeting() {
        let slot = AssistantSlot::new();
        let view = Arc::new(MemoryView::new());
        let client = ScriptedClient::replying(vec![]);
        let p = parts(client, None);

        let first = slot.setup(Container::new("chat", view.clone()), p.clone()).await.unwrap();
        let second = slot.setup(Container::new("chat", Arc::new(MemoryView::new())), p).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let snapshot = view.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].text, AssistantPrompts::default().welcome_message);
        assert_eq!(first.manager().history().len(), 1);
    }

    #[tokio::test]
    async fn send_round_trip_persists_both_turns() {
        let view = Arc::new(MemoryView::new());
        let client = ScriptedClient::replying(vec![Ok("Hello there")]);
        let widget = ChatWidget::new(view.clone(), parts(client.clone(), None));
        widget.initialize().await;

        assert_eq!(widget.send("   ").await, SendOutcome::Ignored);
        match widget.send("  hi  ").await {
            SendOutcome::Replied(reply) => assert_eq!(reply.content, "Hello there"),
            other => panic!("expected reply, got {:?}", other),
        }

        let history = widget.manager().history();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(history[1].content, "hi");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert!(!widget.is_loading());
        assert!(!view.snapshot().loading);
    }

    #[tokio::test]
    async fn model_failure_renders_error_without_saving_it() {
        let view = Arc::new(MemoryView::new());
        let client = ScriptedClient::replying(vec![Err("overloaded")]);
        let widget = ChatWidget::new(view.clone(), parts(client, None));
        widget.initialize().await;

        assert_eq!(widget.send("hello").await, SendOutcome::Failed("overloaded".into()));
        let last = view.snapshot().messages.last().cloned().unwrap();
        assert_eq!(
            last.text,
            "Sorry, I encountered an error. Please try again later. Technical details: overloaded"
        );
        assert_eq!(widget.manager().history().len(), 2);
        assert!(!widget.is_loading());
    }

    #[tokio::test]
    async fn product_search_adds_context_but_saves_original_text() {
        let view = Arc::new(MemoryView::new());
        let client = ScriptedClient::replying(vec![Ok("Here you go")]);
        let storefront = Arc::new(FakeStorefront::default());
        let widget = ChatWidget::new(view.clone(), parts(client.clone(), Some(storefront.clone())));
        widget.initialize().await;

        widget.send("Hi, I'm looking for a mug").await;

        assert_eq!(storefront.queries.lock().unwrap().as_slice(), ["a mug"]);
        assert_eq!(view.snapshot().products.len(), 1);
        let seen = client.seen.lock().unwrap();
        let sent = &seen[0].last().unwrap().content;
        assert!(sent.starts_with("Hi, I'm looking for a mug\n\nAvailable products:"));
        assert!(sent.contains("1. Mug - 12.00 GBP"));
        assert_eq!(widget.manager().history()[1].content, "Hi, I'm looking for a mug");
    }

    #[tokio::test]
    async fn cart_is_created_once() {
        let view = Arc::new(MemoryView::new());
        let client = ScriptedClient::replying(vec![]);
        let storefront = Arc::new(FakeStorefront::default());
        let widget = ChatWidget::new(view.clone(), parts(client, Some(storefront.clone())));

        widget.add_to_cart("v1", 1).await.unwrap();
        let cart = widget.add_to_cart("v2", 2).await.unwrap();
        assert_eq!(*storefront.carts_created.lock().unwrap(), 1);
        assert_eq!(cart.lines.len(), 2);
        assert_eq!(
            view.snapshot().notices.last().unwrap(),
            "Added to cart. Your cart now has 3 item(s)."
        );
    }

    #[tokio::test]
    async fn add_to_cart_without_storefront_shows_notice() {
        let view = Arc::new(MemoryView::new());
        let widget = ChatWidget::new(view.clone(), parts(ScriptedClient::replying(vec![]), None));
        assert!(matches!(widget.add_to_cart("v1", 1).await, Err(StorefrontError::NotConfigured)));
        assert_eq!(view.snapshot().notices.len(), 1);
    }

    #[tokio::test]
    async fn toggle_and_reset() {
        let view = Arc::new(MemoryView::new());
        let widget = ChatWidget::new(view.clone(), parts(ScriptedClient::replying(vec![Ok("ok")]), None));
        widget.initialize().await;
        let first_id = widget.manager().conversation_id();

        assert!(widget.toggle());
        assert!(view.snapshot().minimized);
        assert!(!widget.toggle());

        widget.send("hello").await;
        let new_id = widget.reset().await;
        assert!(new_id.is_some());
        assert_ne!(new_id, first_id);
        assert_eq!(widget.manager().history().len(), 1);
        assert_eq!(view.snapshot().messages.len(), 1);
    }
}
