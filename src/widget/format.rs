use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{ DateTime, Local, TimeZone, Utc };
use once_cell::sync::Lazy;
use regex::Regex;

static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(.*?)\]\((https?://.*?)\)").expect("valid link pattern")
});

static TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)$").expect("valid digits pattern")
});

/// Neutralizes markup so user or model text can be placed inside HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes, then turns `[label](http..)` into links and newlines into `<br>`.
pub fn format_message_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let escaped = escape_html(text);
    let linked = MARKDOWN_LINK.replace_all(
        &escaped,
        r#"<a href="$2" target="_blank" rel="noopener noreferrer">$1</a>"#
    );
    linked.replace('\n', "<br>")
}

/// `DD Mon YYYY, HH:MM` in the local time zone.
pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String {
    date.with_timezone(&Local).format("%d %b %Y, %H:%M").to_string()
}

/// Local time label for an epoch-milliseconds timestamp.
pub fn format_timestamp(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(date) => format_date(&date),
        None => "Invalid date".to_string(),
    }
}

pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_len).collect();
    format!("{}...", cut)
}

pub fn format_price(amount: &str, currency_code: &str) -> String {
    let Ok(value) = amount.trim().parse::<f64>() else {
        return String::new();
    };
    let symbol = match currency_code {
        "GBP" => "£",
        "USD" => "$",
        "EUR" => "€",
        _ => {
            return format!("{} {}", value, currency_code);
        }
    };
    if value < 0.0 {
        format!("-{}{:.2}", symbol, -value)
    } else {
        format!("{}{:.2}", symbol, value)
    }
}

/// Numeric ID from a storefront global ID (`gid://shopify/Product/123`),
/// which may arrive base64-encoded.
pub fn parse_product_id(global_id: &str) -> String {
    if global_id.is_empty() {
        return String::new();
    }
    let decoded = if global_id.contains('=') {
        match BASE64.decode(global_id).ok().and_then(|b| String::from_utf8(b).ok()) {
            Some(s) => s,
            None => {
                return String::new();
            }
        }
    } else {
        global_id.to_string()
    };
    TRAILING_DIGITS.captures(&decoded)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
