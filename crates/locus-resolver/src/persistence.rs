//! Persisted cache storage.
//!
//! The cache is stored as one JSON object keyed by subject:
//!
//! ```text
//! {
//!   "alice": { "location": "France", "expiry": 1767225600000 },
//!   "bob":   { "location": null,     "expiry": 1765000000000 },
//!   "old":   "Chile"                     <- legacy, no expiry: dropped on load
//! }
//! ```
//!
//! `expiry` is unix milliseconds. An entry of any other shape is dropped on
//! its own; the rest of the file still loads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::cache::CacheEntry;
use crate::error::{ResolverError, ResolverResult};
use crate::types::Attribute;

/// Persisted cache contents, in insertion order.
pub type PersistedCache = IndexMap<String, PersistedEntry>;

/// One stored cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistedEntry {
    /// Current format.
    Timed {
        #[serde(default)]
        location: Option<Attribute>,
        #[serde(default)]
        expiry: i64,
    },
    /// Bare value written by older versions; carries no expiry.
    Legacy(Option<Attribute>),
    /// Anything else (wrong field types, numbers, arrays).
    Invalid(serde_json::Value),
}

impl PersistedEntry {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self::Timed {
            location: entry.value.clone(),
            expiry: entry.expires_at.timestamp_millis(),
        }
    }

    /// Convert to a cache entry. Legacy entries have no usable expiry.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Timed { location, expiry } => {
                DateTime::from_timestamp_millis(expiry).map(|expires_at| CacheEntry {
                    value: location,
                    expires_at,
                })
            }
            Self::Legacy(_) | Self::Invalid(_) => None,
        }
    }
}

/// Storage backend for the persisted cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load everything previously saved. A store with nothing saved returns
    /// an empty map.
    async fn load(&self) -> ResolverResult<PersistedCache>;

    /// Replace the stored contents.
    async fn save(&self, entries: &PersistedCache) -> ResolverResult<()>;
}

/// JSON file store with atomic replace on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user cache directory.
    ///
    /// Default: `~/.cache/locus/locations.json`
    pub fn in_default_dir() -> ResolverResult<Self> {
        Ok(Self::new(default_cache_file()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. Missing files are fine.
    pub async fn remove(&self) -> ResolverResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ResolverError::Persistence {
                message: format!("failed to remove cache file: {}", e),
            }),
        }
    }
}

/// Default persisted cache location.
pub fn default_cache_file() -> ResolverResult<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| ResolverError::Config {
            message: "could not determine cache directory".to_string(),
        })?;

    Ok(base.join("locus").join("locations.json"))
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn load(&self) -> ResolverResult<PersistedCache> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted cache");
                return Ok(PersistedCache::new());
            }
            Err(e) => {
                return Err(ResolverError::Persistence {
                    message: format!("failed to read cache file: {}", e),
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| ResolverError::Persistence {
            message: format!("failed to parse cache file: {}", e),
        })
    }

    async fn save(&self, entries: &PersistedCache) -> ResolverResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ResolverError::Persistence {
                    message: format!("failed to create cache directory: {}", e),
                })?;
        }

        let json = serde_json::to_string(entries).map_err(|e| ResolverError::Persistence {
            message: format!("failed to serialize cache: {}", e),
        })?;

        write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), entries = entries.len(), "cache saved");
        Ok(())
    }
}

pub(crate) async fn write_atomic(path: &Path, content: &str) -> ResolverResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| ResolverError::Persistence {
            message: format!("failed to write temp file: {}", e),
        })?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| ResolverError::Persistence {
            message: format!("failed to rename temp file: {}", e),
        })?;

    Ok(())
}

/// In-process store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<PersistedCache>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `entries`.
    pub fn with_entries(entries: PersistedCache) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            saves: Arc::default(),
        }
    }

    /// Current contents.
    pub fn snapshot(&self) -> PersistedCache {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self) -> ResolverResult<PersistedCache> {
        Ok(self.snapshot())
    }

    async fn save(&self, entries: &PersistedCache) -> ResolverResult<()> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries.clone();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("cache").join("locations.json"));
        (store, temp_dir)
    }

    #[test]
    fn test_parse_current_and_legacy_formats() {
        let json = r#"{
            "alice": {"location": "France", "expiry": 1767225600000},
            "bob": {"location": null, "expiry": 1765000000000},
            "carol": "Chile",
            "dave": null
        }"#;

        let parsed: PersistedCache = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed["alice"],
            PersistedEntry::Timed {
                location: Some("France".into()),
                expiry: 1_767_225_600_000
            }
        );
        assert_eq!(
            parsed["bob"],
            PersistedEntry::Timed {
                location: None,
                expiry: 1_765_000_000_000
            }
        );
        assert_eq!(parsed["carol"], PersistedEntry::Legacy(Some("Chile".into())));
        assert_eq!(parsed["dave"], PersistedEntry::Legacy(None));

        assert!(parsed["alice"].clone().into_entry().is_some());
        assert!(parsed["carol"].clone().into_entry().is_none());
    }

    #[test]
    fn test_missing_expiry_defaults_to_epoch() {
        let parsed: PersistedEntry = serde_json::from_str(r#"{"location": "Peru"}"#).unwrap();
        let entry = parsed.into_entry().unwrap();
        assert!(!entry.is_live(Utc::now()));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let (store, _temp_dir) = create_test_store();
        let expiry = (Utc::now() + Duration::days(1)).timestamp_millis();

        let mut entries = PersistedCache::new();
        entries.insert(
            "alice".into(),
            PersistedEntry::Timed {
                location: Some("France".into()),
                expiry,
            },
        );

        store.save(&entries).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, entries);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let (store, _temp_dir) = create_test_store();
        let loaded = store.load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_keeps_good_entries_beside_malformed_ones() {
        let (store, _temp_dir) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap())
            .await
            .unwrap();
        fs::write(
            store.path(),
            r#"{"alice": {"location": "France", "expiry": 99999999999999},
                "bob": {"location": 5, "expiry": 1},
                "carol": {"location": "Peru", "expiry": "x"},
                "dave": [1, 2]}"#,
        )
        .await
        .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(matches!(loaded["bob"], PersistedEntry::Invalid(_)));
        assert!(matches!(loaded["carol"], PersistedEntry::Invalid(_)));
        assert!(matches!(loaded["dave"], PersistedEntry::Invalid(_)));

        let mut cache = crate::cache::ExpiringCache::default();
        assert_eq!(cache.restore(loaded, Utc::now()), 1);
        assert_eq!(
            cache.get("alice", Utc::now()),
            crate::cache::CacheLookup::Hit(Some("France".to_string()))
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_error() {
        let (store, _temp_dir) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap())
            .await
            .unwrap();
        fs::write(store.path(), "not json {{").await.unwrap();

        let result = store.load().await;
        assert!(
            matches!(result, Err(ResolverError::Persistence { .. })),
            "corrupt file should be a persistence error: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let (store, _temp_dir) = create_test_store();
        store.save(&PersistedCache::new()).await.unwrap();

        let dir = store.path().parent().unwrap();
        let mut entries = fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            assert!(
                !name_str.ends_with(".tmp"),
                "Temp file should not remain: {}",
                name_str
            );
        }
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let (store, _temp_dir) = create_test_store();
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(&PersistedCache::new()).await.unwrap();
        store.save(&PersistedCache::new()).await.unwrap();
        assert_eq!(store.save_count(), 2);
    }
}
