//! Modification-time cache backing incremental builds.
//!
//! Tracks the last seen mtime per source file so unchanged content can be
//! skipped on rebuild. The entry is updated at check time, before the file
//! is parsed: a file whose parse then fails will not be retried until it
//! is touched again or the cache is cleared.

use parking_lot::RwLock;
use std::{collections::HashMap, path::PathBuf, time::SystemTime};

#[derive(Default)]
pub struct ModifiedCache {
    entries: RwLock<HashMap<PathBuf, SystemTime>>,
}

impl ModifiedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the path is unseen or strictly newer than the cached
    /// mtime. Records `mtime` as seen either way.
    pub fn is_modified(&self, path: &PathBuf, mtime: SystemTime) -> bool {
        {
            let entries = self.entries.read();
            if let Some(cached) = entries.get(path)
                && mtime <= *cached
            {
                return false;
            }
        }
        self.entries.write().insert(path.clone(), mtime);
        true
    }

    /// Forget everything, forcing the next build to visit every file.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unseen_path_is_modified() {
        let cache = ModifiedCache::new();
        let path = PathBuf::from("/c/a.md");
        assert!(cache.is_modified(&path, SystemTime::UNIX_EPOCH));
        // The check itself records the mtime
        assert!(!cache.is_modified(&path, SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn test_same_mtime_is_not_modified() {
        let cache = ModifiedCache::new();
        let path = PathBuf::from("/c/a.md");
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(cache.is_modified(&path, t));
        assert!(!cache.is_modified(&path, t));
    }

    #[test]
    fn test_newer_mtime_is_modified() {
        let cache = ModifiedCache::new();
        let path = PathBuf::from("/c/a.md");
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t1 = t0 + Duration::from_secs(1);
        assert!(cache.is_modified(&path, t0));
        assert!(cache.is_modified(&path, t1));
        assert!(!cache.is_modified(&path, t0));
    }

    #[test]
    fn test_clear_forgets_entries() {
        let cache = ModifiedCache::new();
        let path = PathBuf::from("/c/a.md");
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(cache.is_modified(&path, t));
        assert!(!cache.is_modified(&path, t));
        cache.clear();
        assert!(cache.is_modified(&path, t));
    }
}
