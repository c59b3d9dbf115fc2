use async_trait::async_trait;
use log::{ debug, error };
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{ json, Value as JsonValue };
use crate::models::commerce::{ Cart, CartLine, CartLineInput, Money, Product };
use crate::storefront::{ Storefront, StorefrontError, STOREFRONT_API_VERSION };

const SEARCH_PRODUCTS: &str = r#"
query GetProducts($query: String!, $first: Int!) {
  products(first: $first, query: $query) {
    edges {
      node {
        id
        title
        description
        handle
        priceRange { minVariantPrice { amount currencyCode } }
        images(first: 1) { edges { node { url altText } } }
        variants(first: 1) {
          edges { node { id title availableForSale price { amount currencyCode } } }
        }
      }
    }
  }
}"#;

const CART_CREATE: &str = r#"
mutation CartCreate {
  cartCreate {
    cart { id checkoutUrl }
  }
}"#;

const CART_FIELDS: &str = r#"
  id
  checkoutUrl
  lines(first: 10) {
    edges {
      node {
        id
        quantity
        merchandise {
          ... on ProductVariant {
            id
            title
            product { title }
            price { amount currencyCode }
          }
        }
      }
    }
  }
  estimatedCost { totalAmount { amount currencyCode } }
"#;

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct Edges<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

#[derive(Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    handle: String,
    price_range: RawPriceRange,
    images: Edges<RawImage>,
    variants: Edges<RawVariant>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceRange {
    min_variant_price: Money,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawImage {
    url: String,
    alt_text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariant {
    id: String,
    #[serde(default)]
    available_for_sale: bool,
    price: Option<Money>,
}

#[derive(Deserialize)]
struct ProductsData {
    products: Edges<RawProduct>,
}

#[derive(Deserialize)]
struct CartPayload {
    cart: Option<RawCart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartCreateData {
    cart_create: CartPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartLinesAddData {
    cart_lines_add: CartPayload,
}

#[derive(Deserialize)]
struct GetCartData {
    cart: Option<RawCart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCart {
    id: String,
    checkout_url: Option<String>,
    lines: Option<Edges<RawCartLine>>,
    estimated_cost: Option<RawCost>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCost {
    total_amount: Option<Money>,
}

#[derive(Deserialize)]
struct RawCartLine {
    id: String,
    quantity: u32,
    merchandise: RawMerchandise,
}

#[derive(Deserialize)]
struct RawMerchandise {
    id: Option<String>,
    title: Option<String>,
    product: Option<RawLineProduct>,
    price: Option<Money>,
}

#[derive(Deserialize)]
struct RawLineProduct {
    title: String,
}

fn flatten_product(raw: RawProduct) -> Product {
    let image = raw.images.edges.into_iter().next().map(|e| e.node);
    let variant = raw.variants.edges.into_iter().next().map(|e| e.node);
    let price = variant
        .as_ref()
        .and_then(|v| v.price.clone())
        .unwrap_or(raw.price_range.min_variant_price);

    Product {
        id: raw.id,
        image_alt: image
            .as_ref()
            .and_then(|i| i.alt_text.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| raw.title.clone()),
        image_url: image.map(|i| i.url).unwrap_or_default(),
        title: raw.title,
        description: raw.description,
        handle: raw.handle,
        price: price.amount,
        currency_code: price.currency_code,
        variant_id: variant.as_ref().map(|v| v.id.clone()).unwrap_or_default(),
        available_for_sale: variant.map(|v| v.available_for_sale).unwrap_or(false),
    }
}

fn flatten_cart(raw: RawCart) -> Cart {
    let lines = raw.lines
        .map(|l| l.edges)
        .unwrap_or_default()
        .into_iter()
        .map(|edge| {
            let line = edge.node;
            CartLine {
                id: line.id,
                quantity: line.quantity,
                merchandise_id: line.merchandise.id.unwrap_or_default(),
                merchandise_title: line.merchandise.title.unwrap_or_default(),
                product_title: line.merchandise.product.map(|p| p.title).unwrap_or_default(),
                price: line.merchandise.price,
            }
        })
        .collect();

    Cart {
        id: raw.id,
        checkout_url: raw.checkout_url,
        lines,
        estimated_total: raw.estimated_cost.and_then(|c| c.total_amount),
    }
}

fn unwrap_response<T>(response: GraphQlResponse<T>) -> Result<T, StorefrontError> {
    if !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(StorefrontError::GraphQl(messages.join("; ")));
    }
    response.data.ok_or(StorefrontError::Missing("data"))
}

/// Storefront GraphQL client for one shop.
pub struct ShopifyStorefront {
    http: HttpClient,
    endpoint: String,
    access_token: String,
}

impl ShopifyStorefront {
    pub fn new(shop_url: &str, access_token: &str) -> Self {
        let host = shop_url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Self {
            http: HttpClient::new(),
            endpoint: format!("https://{}/api/{}/graphql.json", host, STOREFRONT_API_VERSION),
            access_token: access_token.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: JsonValue
    ) -> Result<T, StorefrontError> {
        let resp = self.http
            .post(&self.endpoint)
            .header("X-Shopify-Storefront-Access-Token", &self.access_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            error!("Storefront responded with status {}", status);
            return Err(StorefrontError::Status(status.as_u16()));
        }
        let body: GraphQlResponse<T> = resp.json().await?;
        unwrap_response(body)
    }
}

#[async_trait]
impl Storefront for ShopifyStorefront {
    async fn search_products(&self, query: &str, limit: usize) -> Result<Vec<Product>, StorefrontError> {
        let data: ProductsData = self.execute(
            SEARCH_PRODUCTS,
            json!({ "query": query, "first": limit })
        ).await?;
        let products: Vec<Product> = data.products.edges
            .into_iter()
            .map(|e| flatten_product(e.node))
            .collect();
        debug!("Storefront search '{}' returned {} products", query, products.len());
        Ok(products)
    }

    async fn create_cart(&self) -> Result<Cart, StorefrontError> {
        let data: CartCreateData = self.execute(CART_CREATE, json!({})).await?;
        data.cart_create.cart.map(flatten_cart).ok_or(StorefrontError::Missing("cart"))
    }

    async fn add_to_cart(&self, cart_id: &str, lines: &[CartLineInput]) -> Result<Cart, StorefrontError> {
        let mutation = format!(
            "mutation CartLinesAdd($cartId: ID!, $lines: [CartLineInput!]!) {{ cartLinesAdd(cartId: $cartId, lines: $lines) {{ cart {{ {} }} }} }}",
            CART_FIELDS
        );
        let data: CartLinesAddData = self.execute(
            &mutation,
            json!({ "cartId": cart_id, "lines": lines })
        ).await?;
        data.cart_lines_add.cart.map(flatten_cart).ok_or(StorefrontError::Missing("cart"))
    }

    async fn get_cart(&self, cart_id: &str) -> Result<Cart, StorefrontError> {
        let query = format!("query GetCart($cartId: ID!) {{ cart(id: $cartId) {{ {} }} }}", CART_FIELDS);
        let data: GetCartData = self.execute(&query, json!({ "cartId": cart_id })).await?;
        data.cart.map(flatten_cart).ok_or(StorefrontError::Missing("cart"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_shop_domain() {
        let client = ShopifyStorefront::new("https://cool-store.myshopify.com/", "token");
        assert_eq!(client.endpoint(), "https://cool-store.myshopify.com/api/2023-07/graphql.json");
    }

    #[test]
    fn flattens_products() {
        let raw = json!({
            "data": { "products": { "edges": [
                { "node": {
                    "id": "gid://shopify/Product/1",
                    "title": "Mug",
                    "description": "Big mug",
                    "handle": "mug",
                    "priceRange": { "minVariantPrice": { "amount": "9.00", "currencyCode": "GBP" } },
                    "images": { "edges": [ { "node": { "url": "https://cdn/mug.png", "altText": null } } ] },
                    "variants": { "edges": [ { "node": {
                        "id": "gid://shopify/ProductVariant/11",
                        "title": "Default",
                        "availableForSale": true,
                        "price": { "amount": "12.00", "currencyCode": "GBP" }
                    } } ] }
                } },
                { "node": {
                    "id": "gid://shopify/Product/2",
                    "title": "Spoon",
                    "priceRange": { "minVariantPrice": { "amount": "3.00", "currencyCode": "GBP" } },
                    "images": { "edges": [] },
                    "variants": { "edges": [] }
                } }
            ] } }
        });
        let response: GraphQlResponse<ProductsData> = serde_json::from_value(raw).unwrap();
        let products: Vec<Product> = unwrap_response(response).unwrap()
            .products.edges.into_iter()
            .map(|e| flatten_product(e.node))
            .collect();

        assert_eq!(products[0].price, "12.00");
        assert_eq!(products[0].image_alt, "Mug");
        assert_eq!(products[0].variant_id, "gid://shopify/ProductVariant/11");
        assert!(products[0].available_for_sale);

        assert_eq!(products[1].price, "3.00");
        assert_eq!(products[1].image_url, "");
        assert_eq!(products[1].variant_id, "");
        assert!(!products[1].available_for_sale);
    }

    #[test]
    fn flattens_cart() {
        let raw = json!({
            "data": { "cart": {
                "id": "gid://shopify/Cart/c1",
                "checkoutUrl": "https://shop/checkout",
                "lines": { "edges": [ { "node": {
                    "id": "line-1",
                    "quantity": 2,
                    "merchandise": {
                        "id": "gid://shopify/ProductVariant/11",
                        "title": "Default",
                        "product": { "title": "Mug" },
                        "price": { "amount": "12.00", "currencyCode": "GBP" }
                    }
                } } ] },
                "estimatedCost": { "totalAmount": { "amount": "24.00", "currencyCode": "GBP" } }
            } }
        });
        let response: GraphQlResponse<GetCartData> = serde_json::from_value(raw).unwrap();
        let cart = flatten_cart(unwrap_response(response).unwrap().cart.unwrap());
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].product_title, "Mug");
        assert_eq!(cart.estimated_total.unwrap().amount, "24.00");
    }

    #[test]
    fn graphql_errors_surface() {
        let raw = json!({ "data": null, "errors": [ { "message": "Throttled" }, { "message": "Again" } ] });
        let response: GraphQlResponse<GetCartData> = serde_json::from_value(raw).unwrap();
        let err = unwrap_response(response).err().unwrap();
        assert_eq!(err.to_string(), "storefront query failed: Throttled; Again");
    }
}
