//! Tab-scoped key-value storage for session strings.
//!
//! Reads never fail: an unreadable store is the same as an empty one. Writes
//! report failures so sign-in can surface them.

use residenthub_core::{HubResult, SessionError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// String key to JSON string storage.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> HubResult<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> HubResult<()>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store; lives as long as the embedding "tab".
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        lock(&store.entries).insert(key.into(), value.into());
        store
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> HubResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> HubResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ============================================================================
// FILE STORE
// ============================================================================

/// Store backed by a JSON object on disk, for desktop and CLI embeddings.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, SessionError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| SessionError::ReadFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&contents).map_err(|e| SessionError::Malformed {
            reason: e.to_string(),
        })
    }

    fn load_for_write(&self) -> HashMap<String, String> {
        match self.load() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Replacing unreadable session file");
                HashMap::new()
            }
        }
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<(), SessionError> {
        let write_failed = |reason: String| SessionError::WriteFailed {
            path: self.path.display().to_string(),
            reason,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(entries).map_err(|e| SessionError::SerializeFailed {
                reason: e.to_string(),
            })?;
        std::fs::write(&self.path, contents).map_err(|e| write_failed(e.to_string()))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = lock(&self.guard);
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Session file unreadable");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> HubResult<()> {
        let _guard = lock(&self.guard);
        let mut entries = self.load_for_write();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> HubResult<()> {
        let _guard = lock(&self.guard);
        let mut entries = self.load_for_write();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get("k"), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert!(store.contains("k"));

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileSessionStore::new(&path).set("societycare_auth", r#"{"uid":"u1"}"#).unwrap();
        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.get("societycare_auth").as_deref(), Some(r#"{"uid":"u1"}"#));

        reopened.remove("societycare_auth").unwrap();
        assert_eq!(FileSessionStore::new(&path).get("societycare_auth"), None);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything"), None);
        store.remove("anything").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_as_empty_and_recovers_on_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileSessionStore::new(&path);
        assert_eq!(store.get("k"), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
