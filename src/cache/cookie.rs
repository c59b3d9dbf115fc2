use super::CacheError;
use chrono::{ DateTime, Duration, Utc };
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{ Path, PathBuf };
use std::sync::Mutex;

pub const COOKIE_NAME: &str = "ai_shop_conversation_id";

/// Hosts under the platform's multi-tenant suffix keep their full hostname as cookie domain.
pub const MULTI_TENANT_SUFFIX: &str = "myshopify.com";

pub const COOKIE_LIFETIME_HOURS: i64 = 24;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: DateTime<Utc>,
}

impl Cookie {
    /// The conversation cookie for `hostname`, valid for 24 hours from `now`.
    pub fn conversation(conversation_id: &str, hostname: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: COOKIE_NAME.to_string(),
            value: conversation_id.to_string(),
            domain: cookie_domain(hostname),
            path: "/".to_string(),
            expires: now + Duration::hours(COOKIE_LIFETIME_HOURS),
        }
    }

    /// Same cookie, already expired. Writing it removes the stored one.
    pub fn expired(name: &str, hostname: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            domain: cookie_domain(hostname),
            path: "/".to_string(),
            expires: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Renders the attribute string a page would assign to `document.cookie`
    /// (also valid as a `Set-Cookie` header value).
    pub fn to_header_value(&self) -> String {
        format!(
            "{}={}; expires={}; path={}; domain={}; SameSite=Lax",
            self.name,
            self.value,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.path,
            self.domain
        )
    }
}

/// Cookie domain for `hostname`: bare host for localhost, IP literals and
/// multi-tenant hosts, otherwise the last two labels so subdomains share it.
pub fn cookie_domain(hostname: &str) -> String {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    let unbracketed = host.trim_start_matches('[').trim_end_matches(']');

    if host == "localhost" || unbracketed.parse::<IpAddr>().is_ok() {
        return host;
    }
    if host.contains(MULTI_TENANT_SUFFIX) {
        return host;
    }

    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > 2 {
        return parts[parts.len() - 2..].join(".");
    }
    host
}

/// Cross-subdomain cookie storage as seen from the embedding page.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>, CacheError>;
    fn set(&self, cookie: Cookie) -> Result<(), CacheError>;
}

fn lookup(
    cookies: &HashMap<String, Cookie>,
    name: &str,
    now: DateTime<Utc>
) -> Option<String> {
    cookies
        .get(name)
        .filter(|c| !c.is_expired(now))
        .map(|c| c.value.clone())
        .filter(|v| !v.is_empty())
}

#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, Cookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the jar from a raw `document.cookie`-style string, each cookie valid until `expires`.
    pub fn from_header(header: &str, domain: &str, expires: DateTime<Utc>) -> Self {
        let jar = Self::new();
        if let Ok(mut cookies) = jar.cookies.lock() {
            for pair in header.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    cookies.insert(name.to_string(), Cookie {
                        name: name.to_string(),
                        value: value.to_string(),
                        domain: domain.to_string(),
                        path: "/".to_string(),
                        expires,
                    });
                }
            }
        }
        jar
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.lock().ok().and_then(|c| c.get(name).cloned())
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>, CacheError> {
        let cookies = self.cookies.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(lookup(&cookies, name, now))
    }

    fn set(&self, cookie: Cookie) -> Result<(), CacheError> {
        let mut cookies = self.cookies.lock().map_err(|_| CacheError::Poisoned)?;
        debug!("Set cookie: {}", cookie.to_header_value());
        cookies.insert(cookie.name.clone(), cookie);
        Ok(())
    }
}

/// Cookie jar persisted as one JSON file, for the terminal front end.
pub struct FileCookieJar {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCookieJar {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    fn load(&self) -> Result<HashMap<String, Cookie>, CacheError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) =>
                match serde_json::from_str(&raw) {
                    Ok(cookies) => Ok(cookies),
                    Err(e) => {
                        warn!("Ignoring unreadable cookie file {}: {}", self.path.display(), e);
                        Ok(HashMap::new())
                    }
                }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CookieJar for FileCookieJar {
    fn get(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let cookies = self.load()?;
        Ok(lookup(&cookies, name, now))
    }

    fn set(&self, cookie: Cookie) -> Result<(), CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let mut cookies = self.load()?;
        if cookie.value.is_empty() {
            cookies.remove(&cookie.name);
        } else {
            cookies.insert(cookie.name.clone(), cookie);
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&cookies)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
