use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::warn;

use score_types::{RankingWindow, UserId};

/// Synchronous key/value cache holding the last values confirmed by the store.
pub trait LocalCache: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&self, key: &str, value: i64);
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
}

pub fn score_cache_key(user_id: &UserId) -> String {
    format!("cachedScore/{}", user_id)
}

pub fn nickname_cache_key(user_id: &UserId) -> String {
    format!("cachedNickname/{}", user_id)
}

pub fn window_cache_key(window: RankingWindow, user_id: &UserId) -> String {
    format!("cachedWindowScore/{}/{}", window, user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum CacheValue {
    Int(i64),
    Text(String),
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<String, CacheValue>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: BTreeMap<String, CacheValue>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn get(&self, key: &str) -> Option<CacheValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn insert(&self, key: &str, value: CacheValue) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }

    fn snapshot(&self) -> BTreeMap<String, CacheValue> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LocalCache for MemoryCache {
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            CacheValue::Int(value) => Some(value),
            CacheValue::Text(_) => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        self.insert(key, CacheValue::Int(value));
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            CacheValue::Text(value) => Some(value),
            CacheValue::Int(_) => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.insert(key, CacheValue::Text(value.to_string()));
    }
}

/// Cache persisted as a JSON object on disk, rewritten after every write so
/// values survive restarts.
///
/// Each rewrite goes to a sibling temp file that is then renamed over the
/// target, with `persist_lock` held from snapshot to rename. A reader never
/// sees a partial file and an older snapshot never replaces a newer one.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    inner: MemoryCache,
    persist_lock: Mutex<()>,
}

impl JsonFileCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read(&path)
                .with_context(|| format!("reading cache file {}", path.display()))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("parsing cache file {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self::with_entries(path, entries))
    }

    /// Like `open`, but an unreadable or corrupt file is logged and replaced
    /// by an empty cache on the next write.
    pub fn open_or_empty<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Starting with an empty score cache: {:#}", e);
                Self::with_entries(path.to_path_buf(), BTreeMap::new())
            }
        }
    }

    fn with_entries(path: PathBuf, entries: BTreeMap<String, CacheValue>) -> Self {
        Self {
            path,
            inner: MemoryCache::from_entries(entries),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());

        let entries = self.inner.snapshot();
        let temp_path = self.temp_path();
        let result = serde_json::to_vec_pretty(&entries)
            .context("serializing cache")
            .and_then(|bytes| {
                std::fs::write(&temp_path, bytes)
                    .with_context(|| format!("writing cache file {}", temp_path.display()))
            })
            .and_then(|()| {
                std::fs::rename(&temp_path, &self.path)
                    .with_context(|| format!("replacing cache file {}", self.path.display()))
            });

        if let Err(e) = result {
            warn!("Failed to persist local score cache: {:#}", e);
        }
    }
}

impl LocalCache for JsonFileCache {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.inner.get_int(key)
    }

    fn set_int(&self, key: &str, value: i64) {
        self.inner.set_int(key, value);
        self.persist();
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.inner.get_string(key)
    }

    fn set_string(&self, key: &str, value: &str) {
        self.inner.set_string(key, value);
        self.persist();
    }
}
