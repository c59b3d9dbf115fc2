mod shopify;

pub use shopify::ShopifyStorefront;

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::commerce::{ Cart, CartLineInput, Product };

pub const STOREFRONT_API_VERSION: &str = "2023-07";

#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("storefront request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storefront responded with status {0}")]
    Status(u16),
    #[error("storefront query failed: {0}")]
    GraphQl(String),
    #[error("storefront returned no {0}")]
    Missing(&'static str),
    #[error("storefront is not configured")]
    NotConfigured,
}

/// The commerce platform's customer-facing product and cart API.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn search_products(&self, query: &str, limit: usize) -> Result<Vec<Product>, StorefrontError>;
    async fn create_cart(&self) -> Result<Cart, StorefrontError>;
    async fn add_to_cart(&self, cart_id: &str, lines: &[CartLineInput]) -> Result<Cart, StorefrontError>;
    async fn get_cart(&self, cart_id: &str) -> Result<Cart, StorefrontError>;
}

/// `None` when the store URL or access token is missing; callers then skip product context.
pub fn create_storefront(args: &Args) -> Option<Arc<dyn Storefront>> {
    let shop = args.shopify_store_url.trim();
    let token = args.shopify_storefront_access_token.trim();
    if shop.is_empty() || token.is_empty() {
        warn!("Missing storefront credentials, product search disabled");
        return None;
    }
    info!("Storefront configured for {}", shop);
    Some(Arc::new(ShopifyStorefront::new(shop, token)))
}
