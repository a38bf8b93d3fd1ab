use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::FeedError;

/// Durable local key-value storage. Handed to the components that need it
/// instead of being reached for through globals, so tests can substitute an
/// in-memory backend.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError>;
    fn set(&self, key: &str, value: &str) -> Result<(), FeedError>;
    fn remove(&self, key: &str) -> Result<(), FeedError>;
}

/// Process-local backend for tests and ephemeral profiles.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| FeedError::StorageFailed("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FeedError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FeedError::StorageFailed("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), FeedError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FeedError::StorageFailed("store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a profile directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FeedError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are caller-chosen identifiers, not user input, but keep the
        // filename safe anyway.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StorageBackend for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FeedError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), FeedError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Item ids the user has already consumed. Loaded once at startup, persisted
/// on every mutation, cleared together with its stored copy.
pub struct ViewedSet {
    ids: HashSet<String>,
    store: Arc<dyn StorageBackend>,
    key: String,
}

impl ViewedSet {
    pub const DEFAULT_KEY: &'static str = "viewed-items";

    pub fn load(store: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        let key = key.into();
        let ids = match store.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "stored viewed-set is corrupt, starting empty");
                    HashSet::new()
                }
            },
            Ok(None) => HashSet::new(),
            Err(e) => {
                warn!(error = %e, "could not read stored viewed-set, starting empty");
                HashSet::new()
            }
        };
        debug!(count = ids.len(), "viewed-set loaded");
        Self { ids, store, key }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Adds `id` and persists. A write failure keeps the in-memory entry and
    /// is reported without unwinding.
    pub fn insert(&mut self, id: impl Into<String>) -> Result<(), FeedError> {
        if self.ids.insert(id.into()) {
            self.persist()?;
        }
        Ok(())
    }

    /// Clears the set and its stored copy together, never one without the
    /// other.
    pub fn clear(&mut self) -> Result<(), FeedError> {
        self.ids.clear();
        self.store.remove(&self.key)
    }

    fn persist(&self) -> Result<(), FeedError> {
        let mut ids: Vec<&String> = self.ids.iter().collect();
        ids.sort();
        let raw = serde_json::to_string(&ids)?;
        self.store.set(&self.key, &raw)
    }
}
