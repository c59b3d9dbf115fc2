use clap::{ Parser, Subcommand };

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP proxy for the storefront widget (default).
    Serve,
    /// Chat with the assistant from the terminal. State persists in STATE_DIR between runs.
    Chat,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Language Model Args ---
    /// API key for the language model. The proxy also accepts a per-request `x-api-key` header.
    #[arg(long, env = "CLAUDE_API_KEY", default_value = "", global = true)]
    pub claude_api_key: String,

    /// Base URL of the language model API.
    #[arg(long, env = "CLAUDE_BASE_URL", default_value = "https://api.anthropic.com", global = true)]
    pub claude_base_url: String,

    /// Model name sent with every completion request.
    #[arg(long, env = "CLAUDE_MODEL", default_value = "claude-3-7-sonnet-20250219", global = true)]
    pub claude_model: String,

    #[arg(long, env = "CLAUDE_MAX_TOKENS", default_value = "1024", global = true)]
    pub claude_max_tokens: u32,

    /// Proxy endpoint the chat client talks to. When unset the chat client calls the API directly.
    #[arg(long, env = "CHAT_PROXY_URL", global = true)]
    pub chat_proxy_url: Option<String>,

    // --- History Store Args ---
    /// Remote conversation store type (supabase, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "supabase", global = true)]
    pub history_type: String,

    /// Supabase project URL (e.g., https://xyz.supabase.co)
    #[arg(long, env = "SUPABASE_URL", default_value = "", global = true)]
    pub supabase_url: String,

    /// Supabase anon or service key.
    #[arg(long, env = "SUPABASE_KEY", default_value = "", global = true)]
    pub supabase_key: String,

    // --- Storefront Args ---
    /// Shop domain (e.g., my-store.myshopify.com)
    #[arg(long, env = "SHOPIFY_STORE_URL", default_value = "", global = true)]
    pub shopify_store_url: String,

    #[arg(long, env = "SHOPIFY_STOREFRONT_ACCESS_TOKEN", default_value = "", global = true)]
    pub shopify_storefront_access_token: String,

    /// Secret used to verify webhook HMAC signatures. Verification is skipped when empty.
    #[arg(long, env = "SHOPIFY_WEBHOOK_SECRET", default_value = "", global = true)]
    pub shopify_webhook_secret: String,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:8000", global = true)]
    pub server_addr: String,

    /// Public URL of the deployed app, added to the CORS allowlist.
    #[arg(long, env = "APP_URL", global = true)]
    pub app_url: Option<String>,

    /// Deployment environment name (development, production)
    #[arg(long, env = "APP_ENV", default_value = "development", global = true)]
    pub app_env: String,

    /// Directory holding index.html, embed.html and test.html.
    #[arg(long, env = "PUBLIC_DIR", default_value = "public", global = true)]
    pub public_dir: String,

    /// Requests per second accepted by the model proxy.
    #[arg(long, env = "PROXY_RATE_LIMIT", default_value = "10", global = true)]
    pub proxy_rate_limit: u32,

    #[arg(long, env = "ENABLE_TLS", default_value = "false", global = true)]
    pub enable_tls: bool,

    /// Path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH", global = true)]
    pub tls_cert_path: Option<String>,

    /// Path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH", global = true)]
    pub tls_key_path: Option<String>,

    // --- Widget Args ---
    /// Optional JSON file overriding the system prompt and widget messages.
    #[arg(long, env = "PROMPTS_PATH", global = true)]
    pub prompts_path: Option<String>,

    /// Directory for the terminal chat's local cache and cookie jar.
    #[arg(long, env = "STATE_DIR", default_value = ".shop-assistant", global = true)]
    pub state_dir: String,

    /// Hostname the widget pretends to be embedded on; decides the cookie domain.
    #[arg(long, env = "PAGE_HOST", default_value = "localhost", global = true)]
    pub page_host: String,

    /// Shop owning new conversations. Falls back to the default shop sentinel.
    #[arg(long, env = "SHOP_ID", global = true)]
    pub shop_id: Option<String>,

    /// Authenticated customer, if any.
    #[arg(long, env = "CUSTOMER_ID", global = true)]
    pub customer_id: Option<String>,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let args = Args::parse_from(["shop-assistant"]);
        assert_eq!(args.command(), Command::Serve);
        assert_eq!(args.claude_max_tokens, 1024);
    }

    #[test]
    fn chat_subcommand_accepts_global_flags() {
        let args = Args::parse_from([
            "shop-assistant",
            "chat",
            "--history-type",
            "memory",
            "--page-host",
            "www.example.com",
        ]);
        assert_eq!(args.command(), Command::Chat);
        assert_eq!(args.history_type, "memory");
        assert_eq!(args.page_host, "www.example.com");
    }
}
