use once_cell::sync::Lazy;
use regex::Regex;
use crate::models::commerce::{ Cart, Product };
use crate::widget::format::truncate_text;

const SEARCH_PHRASES: [&str; 12] = [
    "looking for",
    "search for",
    "find",
    "do you have",
    "i want",
    "i need",
    "show me",
    "where can i find",
    "where are",
    "got any",
    "recommend",
    "suggestion",
];

static POLITE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(can you|could you|would you|please|hi|hello|hey)[\s,]+").expect("valid prefix pattern")
});

static SELF_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(i'm|im|i am)[\s,]+").expect("valid prefix pattern")
});

static SEARCH_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(looking for|search for|find|do you have|i want|i need|show me|where can i find|where are|got any)[\s,]*"
    ).expect("valid prefix pattern")
});

/// Storefront data attached to the outgoing model prompt.
#[derive(Debug, Clone, Default)]
pub struct ShoppingContext {
    pub products: Vec<Product>,
    pub cart: Option<Cart>,
}

impl ShoppingContext {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.cart.as_ref().map_or(true, |c| c.lines.is_empty())
    }
}

pub fn is_product_search(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    let lowered = message.to_lowercase();
    SEARCH_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Strips greetings and the search phrase, leaving the thing being searched for.
pub fn extract_search_terms(message: &str) -> String {
    let trimmed = message.trim();
    let step = POLITE_PREFIX.replace(trimmed, "");
    let step = SELF_PREFIX.replace(&step, "");
    let step = SEARCH_PREFIX.replace(&step, "");
    step.trim().to_string()
}

/// Appends product and cart listings to the user's message.
pub fn format_message_with_context(message: &str, context: &ShoppingContext) -> String {
    let mut formatted = message.to_string();

    if !context.products.is_empty() {
        formatted.push_str("\n\nAvailable products:\n");
        for (index, product) in context.products.iter().enumerate() {
            formatted.push_str(
                &format!("\n{}. {} - {} {}", index + 1, product.title, product.price, product.currency_code)
            );
            if !product.description.is_empty() {
                formatted.push_str(
                    &format!("\n   Description: {}", truncate_text(&product.description, 100))
                );
            }
        }
    }

    if let Some(cart) = context.cart.as_ref().filter(|c| !c.lines.is_empty()) {
        formatted.push_str("\n\nCurrent cart:\n");
        for (index, line) in cart.lines.iter().enumerate() {
            formatted.push_str(
                &format!("\n{}. {} - Quantity: {}", index + 1, line.product_title, line.quantity)
            );
        }
        if let Some(total) = &cart.estimated_total {
            formatted.push_str(&format!("\n\nTotal: {} {}", total.amount, total.currency_code));
        }
    }

    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::commerce::{ CartLine, Money };

    fn product(title: &str, description: &str) -> Product {
        Product {
            id: format!("gid://shopify/Product/{}", title.len()),
            title: title.into(),
            description: description.into(),
            handle: title.to_lowercase(),
            price: "20.00".into(),
            currency_code: "GBP".into(),
            image_url: String::new(),
            image_alt: String::new(),
            variant_id: "gid://shopify/ProductVariant/1".into(),
            available_for_sale: true,
        }
    }

    #[test]
    fn detects_search_phrases() {
        assert!(is_product_search("Do you have any red trainers?"));
        assert!(is_product_search("Can you RECOMMEND a kettle"));
        assert!(!is_product_search("What are your opening hours?"));
        assert!(!is_product_search(""));
    }

    #[test]
    fn extracts_terms() {
        assert_eq!(extract_search_terms("Hi, I'm looking for red shoes"), "red shoes");
        assert_eq!(extract_search_terms("show me wool jumpers"), "wool jumpers");
        assert_eq!(extract_search_terms("Could you find a lamp"), "a lamp");
        assert_eq!(extract_search_terms("kettles"), "kettles");
    }

    #[test]
    fn plain_message_without_context() {
        assert_eq!(format_message_with_context("hello", &ShoppingContext::default()), "hello");
    }

    #[test]
    fn appends_products_and_cart() {
        let context = ShoppingContext {
            products: vec![product("Mug", &"a".repeat(120)), product("Tea", "")],
            cart: Some(Cart {
                id: "cart-1".into(),
                checkout_url: None,
                lines: vec![CartLine {
                    id: "line-1".into(),
                    quantity: 2,
                    merchandise_id: "v1".into(),
                    merchandise_title: "Default".into(),
                    product_title: "Mug".into(),
                    price: None,
                }],
                estimated_total: Some(Money { amount: "40.0".into(), currency_code: "GBP".into() }),
            }),
        };
        let out = format_message_with_context("show me mugs", &context);
        let expected = format!(
            "show me mugs\n\nAvailable products:\n\n1. Mug - 20.00 GBP\n   Description: {}...\n2. Tea - 20.00 GBP\n\nCurrent cart:\n\n1. Mug - Quantity: 2\n\nTotal: 40.0 GBP",
            "a".repeat(100)
        );
        assert_eq!(out, expected);
        assert!(!context.is_empty());
    }
}
