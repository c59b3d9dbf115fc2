pub mod cookie;
pub mod file;

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub use file::FileCache;

/// Key under which the widget keeps its conversation snapshot.
pub const STORAGE_KEY: &str = "aiShoppingAssistant_conversation";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Same-origin durable key/value storage, the equivalent of a page's local storage.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_set_get_remove() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get(STORAGE_KEY).unwrap(), None);
        cache.set(STORAGE_KEY, "{}").unwrap();
        assert_eq!(cache.get(STORAGE_KEY).unwrap().as_deref(), Some("{}"));
        cache.set(STORAGE_KEY, "[]").unwrap();
        assert_eq!(cache.get(STORAGE_KEY).unwrap().as_deref(), Some("[]"));
        cache.remove(STORAGE_KEY).unwrap();
        assert_eq!(cache.get(STORAGE_KEY).unwrap(), None);
    }
}
