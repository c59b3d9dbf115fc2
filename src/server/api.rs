use crate::cli::Args;
use crate::llm::{ ErrorEnvelope, ANTHROPIC_VERSION, MESSAGES_ROUTE, PROXY_ROUTE };
use crate::server::cors::cors_layer;
use crate::server::webhook::shopify_webhook_handler;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use axum::{
    body::Bytes,
    routing::{ get, post },
    Router,
    Json,
    extract::{ State, Query },
    response::{ IntoResponse, Response },
    http::{ header, HeaderMap, StatusCode },
};
use chrono::Utc;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use serde::Deserialize;
use serde_json::json;
use tower_http::services::{ ServeDir, ServeFile };
use log::{ info, error, warn };

pub type ProxyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub args: Arc<Args>,
    http: reqwest::Client,
    limiter: Arc<ProxyLimiter>,
    started: Instant,
}

impl AppState {
    pub fn new(args: Args) -> Self {
        let per_second = NonZeroU32::new(args.proxy_rate_limit).unwrap_or(NonZeroU32::MIN);
        Self {
            args: Arc::new(args),
            http: reqwest::Client::new(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            started: Instant::now(),
        }
    }
}

#[derive(Deserialize)]
pub struct SettingsQuery {
    pub shop: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let public = Path::new(&state.args.public_dir).to_path_buf();
    let cors = cors_layer(&state.args);

    Router::new()
        .route(PROXY_ROUTE, post(claude_proxy_handler))
        .route("/health", get(health_handler))
        .route("/api/test", get(api_test_handler))
        .route("/api/shopify-settings", get(shopify_settings_handler))
        .route("/api/webhooks/shopify", post(shopify_webhook_handler))
        .route_service("/", ServeFile::new(public.join("index.html")))
        .route_service("/embed", ServeFile::new(public.join("embed.html")))
        .route_service("/test", ServeFile::new(public.join("test.html")))
        .fallback_service(ServeDir::new(public))
        .layer(cors)
        .with_state(state)
}

fn envelope(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorEnvelope::new(message))).into_response()
}

/// Forwards a messages request to the model API and relays whatever comes back.
async fn claude_proxy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Response {
    if state.limiter.check().is_err() {
        warn!("Model proxy rate limit exceeded");
        return envelope(StatusCode::TOO_MANY_REQUESTS, "Too many requests, please try again shortly");
    }

    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| Some(state.args.claude_api_key.clone()).filter(|k| !k.is_empty()));
    let Some(api_key) = api_key else {
        error!("Missing Claude API key");
        return envelope(StatusCode::BAD_REQUEST, "API key is required");
    };

    info!("Forwarding model request ({} bytes)", body.len());
    let url = format!("{}{}", state.args.claude_base_url.trim_end_matches('/'), MESSAGES_ROUTE);
    let upstream = state.http
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .body(body)
        .send().await;

    let resp = match upstream {
        Ok(resp) => resp,
        Err(e) => {
            error!("Error proxying to model API: {}", e);
            return envelope(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    info!("Model API responded with status: {}", status);
    match resp.bytes().await {
        Ok(bytes) => {
            if !status.is_success() {
                error!("Model API error: {}", String::from_utf8_lossy(&bytes));
            }
            (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            error!("Failed to read model API response: {}", e);
            envelope(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(
        json!({
            "status": "ok",
            "uptime": state.started.elapsed().as_secs_f64(),
            "environment": state.args.app_env,
            "version": env!("CARGO_PKG_VERSION"),
        })
    )
}

async fn api_test_handler(State(state): State<AppState>) -> impl IntoResponse {
    let args = &state.args;
    Json(
        json!({
            "message": "API test endpoint is working",
            "timestamp": Utc::now().to_rfc3339(),
            "env": {
                "hasClaudeKey": !args.claude_api_key.is_empty(),
                "hasSupabaseKey": !args.supabase_key.is_empty(),
                "hasSupabaseUrl": !args.supabase_url.is_empty(),
                "appEnv": args.app_env,
            }
        })
    )
}

/// Public settings for a widget embedded on a shop.
async fn shopify_settings_handler(
    State(state): State<AppState>,
    Query(query): Query<SettingsQuery>
) -> Response {
    let Some(shop) = query.shop.filter(|s| s.contains("myshopify.com")) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid shop parameter" }))).into_response();
    };
    let args = &state.args;
    let shop_url = if args.shopify_store_url.is_empty() { shop } else { args.shopify_store_url.clone() };
    Json(
        json!({
            "shopUrl": shop_url,
            "appUrl": args.app_url.clone().unwrap_or_default(),
            "hasStorefrontToken": !args.shopify_storefront_access_token.is_empty(),
            "hasClaudeKey": !args.claude_api_key.is_empty(),
        })
    ).into_response()
}
