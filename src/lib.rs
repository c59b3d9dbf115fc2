pub mod models;
pub mod server;
pub mod config;
pub mod llm;
pub mod cli;
pub mod history;
pub mod cache;
pub mod session;
pub mod storefront;
pub mod widget;

use cache::cookie::FileCookieJar;
use cache::FileCache;
use cli::{ Args, Command };
use llm::ClaudeClient;
use log::{ info, warn };
use server::Server;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use widget::view::{ Container, TerminalView };
use widget::{ AssistantSlot, ChatWidget, SendOutcome, WidgetParts };

fn present(value: &str) -> &'static str {
    if value.trim().is_empty() { "missing" } else { "set" }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Command: {:?}", args.command());
    info!("Environment: {}", args.app_env);
    info!("Server Address: {}", args.server_addr);
    info!("Model: {} (max tokens {})", args.claude_model, args.claude_max_tokens);
    info!("Model API Key: {}", present(&args.claude_api_key));
    info!("Model Proxy: {}", args.chat_proxy_url.as_deref().unwrap_or("none (direct)"));
    info!("History Store Type: {}", args.history_type);
    info!("Supabase URL: {}", present(&args.supabase_url));
    info!("Supabase Key: {}", present(&args.supabase_key));
    info!("Shopify Store: {}", if args.shopify_store_url.is_empty() { "none" } else { args.shopify_store_url.as_str() });
    info!("Storefront Token: {}", present(&args.shopify_storefront_access_token));
    info!("Webhook Secret: {}", present(&args.shopify_webhook_secret));
    info!("Public Dir: {}", args.public_dir);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    match args.command() {
        Command::Serve => {
            let server = Server::new(args.server_addr.clone(), args);
            server.run().await
        }
        Command::Chat => run_chat(args).await,
    }
}

fn widget_parts(args: &Args) -> Result<WidgetParts, Box<dyn Error + Send + Sync>> {
    let state_dir = Path::new(&args.state_dir);
    let prompts = config::load_prompts_or_default(args.prompts_path.as_deref());
    let client = ClaudeClient::from_args(args).system(prompts.system_prompt.clone());

    Ok(WidgetParts {
        store: history::initialize_history_store(args)?,
        cache: Arc::new(FileCache::new(state_dir)?),
        cookies: Arc::new(FileCookieJar::new(state_dir.join("cookies.json"))?),
        client: Arc::new(client),
        storefront: storefront::create_storefront(args),
        prompts,
        page_host: args.page_host.clone(),
        shop_id: args.shop_id.clone().unwrap_or_default(),
        customer_id: args.customer_id.clone().filter(|c| !c.is_empty()),
        clock: None,
    })
}

/// Terminal front end over the same widget the storefront embeds.
async fn run_chat(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let parts = widget_parts(&args)?;
    let slot = AssistantSlot::new();
    let widget = slot.setup(Container::new("terminal", Arc::new(TerminalView::new())), parts).await?;

    println!("Type a message, or /add <variant-id> [qty], /reset, /toggle, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle_line(&widget, line.trim()).await {
            break;
        }
    }
    info!("Chat session ended");
    Ok(())
}

async fn handle_line(widget: &ChatWidget, line: &str) -> bool {
    match line {
        "/quit" | "/exit" => {
            return false;
        }
        "/reset" => {
            widget.reset().await;
        }
        "/toggle" => {
            let minimized = widget.toggle();
            info!("Chat {}", if minimized { "minimised" } else { "restored" });
        }
        _ if line.starts_with("/add ") => {
            let mut parts = line.split_whitespace().skip(1);
            let Some(variant_id) = parts.next() else {
                warn!("Usage: /add <variant-id> [qty]");
                return true;
            };
            let quantity = parts.next().and_then(|q| q.parse().ok()).unwrap_or(1);
            if let Ok(cart) = widget.add_to_cart(variant_id, quantity).await {
                let items: u32 = cart.lines.iter().map(|l| l.quantity).sum();
                info!("Cart {} now holds {} item(s)", cart.id, items);
                if let Some(url) = cart.checkout_url.as_deref() {
                    info!("Checkout: {}", url);
                }
            }
        }
        _ => {
            if widget.send(line).await == SendOutcome::Ignored && !line.is_empty() {
                warn!("Still waiting for the previous reply");
            }
        }
    }
    true
}
