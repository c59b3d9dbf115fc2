use super::{ CacheError, LocalCache };
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };

/// Stores each key as `<dir>/<key>.json`. Writes go through a temp file and a rename.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty() &&
            key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!("Wrote cache entry {} ({} bytes)", path.display(), value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = FileCache::new(dir.path()).unwrap();
            cache.set("aiShoppingAssistant_conversation", r#"{"a":1}"#).unwrap();
        }
        let reopened = FileCache::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("aiShoppingAssistant_conversation").unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[test]
    fn missing_key_and_double_remove_are_fine() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().join("nested")).unwrap();
        assert_eq!(cache.get("absent").unwrap(), None);
        cache.remove("absent").unwrap();
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        assert!(matches!(cache.set("../escape", "x"), Err(CacheError::InvalidKey(_))));
        assert!(matches!(cache.get(""), Err(CacheError::InvalidKey(_))));
    }
}
