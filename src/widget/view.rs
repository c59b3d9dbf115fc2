use std::io::{ self, Write };
use std::sync::{ Arc, Mutex };
use thiserror::Error;
use crate::models::chat::{ ChatMessage, Role };
use crate::models::commerce::Product;
use crate::widget::format::{
    escape_html,
    format_message_text,
    format_price,
    format_timestamp,
    truncate_text,
};

const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/150";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WidgetError {
    #[error("container '{container}' has no {element} element")]
    ElementNotFound {
        container: String,
        element: &'static str,
    },
}

/// One rendered chat bubble. `html` is already safe to inject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageElement {
    pub role: Role,
    pub text: String,
    pub html: String,
    pub time: String,
}

impl MessageElement {
    /// User text is escaped verbatim; assistant text also gets link and line-break formatting.
    pub fn from_message(message: &ChatMessage) -> Self {
        let html = match message.role {
            Role::User => escape_html(&message.content),
            Role::Assistant => format_message_text(&message.content),
        };
        Self {
            role: message.role,
            text: message.content.clone(),
            html,
            time: format_timestamp(message.timestamp),
        }
    }

    pub fn class_name(&self) -> String {
        format!("message {}-message", self.role)
    }

    pub fn to_html(&self) -> String {
        format!(
            "<div class=\"{}\"><div class=\"message-content\"><p>{}</p></div><div class=\"message-time\">{}</div></div>",
            self.class_name(),
            self.html,
            escape_html(&self.time)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProductCard {
    pub product_id: String,
    pub variant_id: String,
    pub title: String,
    pub price: String,
    pub description: Option<String>,
    pub image_url: String,
    pub image_alt: String,
    pub button_label: &'static str,
    pub can_add_to_cart: bool,
}

impl ProductCard {
    pub fn from_product(product: &Product) -> Self {
        let description = if product.description.is_empty() {
            None
        } else {
            Some(truncate_text(&product.description, 80))
        };
        Self {
            product_id: product.id.clone(),
            variant_id: product.variant_id.clone(),
            title: product.title.clone(),
            price: format_price(&product.price, &product.currency_code),
            description,
            image_url: if product.image_url.is_empty() {
                PLACEHOLDER_IMAGE.to_string()
            } else {
                product.image_url.clone()
            },
            image_alt: if product.image_alt.is_empty() {
                product.title.clone()
            } else {
                product.image_alt.clone()
            },
            button_label: if product.available_for_sale { "Add to Cart" } else { "Out of Stock" },
            can_add_to_cart: product.available_for_sale && !product.variant_id.is_empty(),
        }
    }
}

/// Where the widget draws. Implementations stand in for the page's message list and controls.
pub trait ChatView: Send + Sync {
    fn append_message(&self, element: MessageElement);
    fn clear_messages(&self);
    /// True when any assistant bubble is already on screen.
    fn has_assistant_message(&self) -> bool;
    fn set_loading(&self, loading: bool);
    fn show_products(&self, cards: &[ProductCard]);
    fn show_notice(&self, text: &str);
    fn set_minimized(&self, minimized: bool);
}

/// The page area the widget binds to. `messages` is absent when the host page lacks the list.
pub struct Container {
    pub id: String,
    pub messages: Option<Arc<dyn ChatView>>,
}

impl Container {
    pub fn new(id: impl Into<String>, messages: Arc<dyn ChatView>) -> Self {
        Self { id: id.into(), messages: Some(messages) }
    }

    pub fn empty(id: impl Into<String>) -> Self {
        Self { id: id.into(), messages: None }
    }

    pub fn bind(self) -> Result<Arc<dyn ChatView>, WidgetError> {
        self.messages.ok_or(WidgetError::ElementNotFound {
            container: self.id,
            element: "messages",
        })
    }
}

#[derive(Default, Clone, Debug)]
pub struct ViewSnapshot {
    pub messages: Vec<MessageElement>,
    pub products: Vec<ProductCard>,
    pub notices: Vec<String>,
    pub loading: bool,
    pub minimized: bool,
}

/// Records everything drawn; used by tests and by embedders that render elsewhere.
#[derive(Default)]
pub struct MemoryView {
    state: Mutex<ViewSnapshot>,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn to_html(&self) -> String {
        self.snapshot()
            .messages.iter()
            .map(MessageElement::to_html)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn with_state(&self, f: impl FnOnce(&mut ViewSnapshot)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl ChatView for MemoryView {
    fn append_message(&self, element: MessageElement) {
        self.with_state(|s| s.messages.push(element));
    }

    fn clear_messages(&self) {
        self.with_state(|s| {
            s.messages.clear();
            s.products.clear();
            s.notices.clear();
        });
    }

    fn has_assistant_message(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.messages.iter().any(|m| m.role == Role::Assistant))
            .unwrap_or(false)
    }

    fn set_loading(&self, loading: bool) {
        self.with_state(|s| {
            s.loading = loading;
        });
    }

    fn show_products(&self, cards: &[ProductCard]) {
        self.with_state(|s| s.products.extend_from_slice(cards));
    }

    fn show_notice(&self, text: &str) {
        self.with_state(|s| s.notices.push(text.to_string()));
    }

    fn set_minimized(&self, minimized: bool) {
        self.with_state(|s| {
            s.minimized = minimized;
        });
    }
}

/// Plain-text rendering on stdout for the `chat` subcommand.
#[derive(Default)]
pub struct TerminalView {
    assistant_seen: Mutex<bool>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    fn print(&self, line: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

impl ChatView for TerminalView {
    fn append_message(&self, element: MessageElement) {
        let who = match element.role {
            Role::User => "You",
            Role::Assistant => {
                if let Ok(mut seen) = self.assistant_seen.lock() {
                    *seen = true;
                }
                "Assistant"
            }
        };
        self.print(&format!("[{}] {}: {}", element.time, who, element.text));
    }

    fn clear_messages(&self) {
        if let Ok(mut seen) = self.assistant_seen.lock() {
            *seen = false;
        }
        self.print("--- conversation cleared ---");
    }

    fn has_assistant_message(&self) -> bool {
        self.assistant_seen.lock().map(|s| *s).unwrap_or(false)
    }

    fn set_loading(&self, loading: bool) {
        if loading {
            self.print("...");
        }
    }

    fn show_products(&self, cards: &[ProductCard]) {
        for (index, card) in cards.iter().enumerate() {
            self.print(
                &format!("  {}. {} {} [{}] ({})", index + 1, card.title, card.price, card.button_label, card.variant_id)
            );
        }
    }

    fn show_notice(&self, text: &str) {
        self.print(&format!("* {}", text));
    }

    fn set_minimized(&self, minimized: bool) {
        self.print(if minimized { "[+] chat minimised" } else { "[-] chat restored" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_is_escaped_but_not_linkified() {
        let msg = ChatMessage::new(Role::User, "<b>[a](https://x.io)</b>", 0);
        let element = MessageElement::from_message(&msg);
        assert_eq!(element.html, "&lt;b&gt;[a](https://x.io)&lt;/b&gt;");
        assert_eq!(element.class_name(), "message user-message");
    }

    #[test]
    fn assistant_text_is_linkified() {
        let msg = ChatMessage::new(Role::Assistant, "Try [this](https://x.io)\nok", 0);
        let element = MessageElement::from_message(&msg);
        assert!(element.html.contains("<a href=\"https://x.io\""));
        assert!(element.html.contains("<br>"));
        assert!(element.to_html().starts_with("<div class=\"message assistant-message\">"));
    }

    #[test]
    fn bind_fails_fast_without_messages() {
        let err = Container::empty("ai-shopping-assistant").bind().err().unwrap();
        assert_eq!(err, WidgetError::ElementNotFound {
            container: "ai-shopping-assistant".into(),
            element: "messages",
        });
        let view: Arc<dyn ChatView> = Arc::new(MemoryView::new());
        assert!(Container::new("ai-shopping-assistant", view).bind().is_ok());
    }

    #[test]
    fn memory_view_tracks_assistant_bubbles() {
        let view = MemoryView::new();
        assert!(!view.has_assistant_message());
        view.append_message(MessageElement::from_message(&ChatMessage::new(Role::User, "hi", 0)));
        assert!(!view.has_assistant_message());
        view.append_message(MessageElement::from_message(&ChatMessage::new(Role::Assistant, "hello", 0)));
        assert!(view.has_assistant_message());
        view.clear_messages();
        assert!(!view.has_assistant_message());
    }

    #[test]
    fn product_card_defaults() {
        let product = Product {
            id: "gid://shopify/Product/1".into(),
            title: "Mug".into(),
            description: "x".repeat(100),
            handle: "mug".into(),
            price: "12".into(),
            currency_code: "GBP".into(),
            image_url: String::new(),
            image_alt: String::new(),
            variant_id: String::new(),
            available_for_sale: false,
        };
        let card = ProductCard::from_product(&product);
        assert_eq!(card.price, "£12.00");
        assert_eq!(card.image_url, PLACEHOLDER_IMAGE);
        assert_eq!(card.image_alt, "Mug");
        assert_eq!(card.button_label, "Out of Stock");
        assert!(!card.can_add_to_cart);
        assert_eq!(card.description.unwrap().len(), 83);
    }
}
