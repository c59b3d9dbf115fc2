use axum::http::{ header, HeaderName, HeaderValue, Method };
use log::{ debug, warn };
use tower_http::cors::{ AllowOrigin, CorsLayer };
use crate::cli::Args;
use crate::cache::cookie::MULTI_TENANT_SUFFIX;

const LOCAL_ORIGINS: [&str; 2] = ["http://localhost:8000", "http://localhost:8082"];

/// Exact origins accepted besides any shop on the multi-tenant domain.
pub fn allowed_origins(args: &Args) -> Vec<String> {
    let mut origins: Vec<String> = LOCAL_ORIGINS.iter().map(|o| o.to_string()).collect();
    if let Some(app_url) = args.app_url.as_deref().filter(|u| !u.is_empty()) {
        origins.push(app_url.trim_end_matches('/').to_string());
    }
    let store = args.shopify_store_url.trim().trim_end_matches('/');
    if !store.is_empty() {
        if store.starts_with("http://") || store.starts_with("https://") {
            origins.push(store.to_string());
        } else {
            origins.push(format!("https://{}", store));
        }
    }
    origins
}

pub fn is_origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if origin.contains(MULTI_TENANT_SUFFIX) {
        return true;
    }
    allowed.iter().any(|o| o == origin)
}

/// Requests without an Origin header never reach the predicate and pass untouched.
pub fn cors_layer(args: &Args) -> CorsLayer {
    let allowed = allowed_origins(args);
    let log_origins = !args.is_production();
    CorsLayer::new()
        .allow_origin(
            AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                let origin = origin.to_str().unwrap_or_default();
                if log_origins {
                    debug!("Request origin: {}", origin);
                }
                let ok = is_origin_allowed(origin, &allowed);
                if !ok {
                    warn!("CORS blocked for origin: {}", origin);
                }
                ok
            })
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("anthropic-version"),
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn allowlist_and_shop_domains() {
        let args = Args::parse_from([
            "shop-assistant",
            "--app-url",
            "https://assistant.example.com/",
            "--shopify-store-url",
            "cool-store.myshopify.com",
        ]);
        let allowed = allowed_origins(&args);
        assert!(allowed.contains(&"https://assistant.example.com".to_string()));
        assert!(allowed.contains(&"https://cool-store.myshopify.com".to_string()));

        assert!(is_origin_allowed("http://localhost:8082", &allowed));
        assert!(is_origin_allowed("https://assistant.example.com", &allowed));
        assert!(is_origin_allowed("https://other-shop.myshopify.com", &allowed));
        assert!(!is_origin_allowed("https://evil.example.net", &allowed));
        assert!(!is_origin_allowed("http://localhost:3000", &allowed));
    }
}
