//! Local expiring cache.
//!
//! Insertion-ordered map of subject → cached attribute with per-entry expiry.
//! A confirmed-absent result (`None`) is cached too, with a shorter TTL than a
//! found one.
//!
//! # Bounds
//!
//! ```text
//! size <= capacity + grace          (hard ceiling, checked on every put)
//! cleanup: expired first, then insertion-oldest until size <= capacity
//! ```

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::persistence::{PersistedCache, PersistedEntry};
use crate::types::Attribute;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Size and expiry bounds for [`ExpiringCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    /// Size the cache is trimmed back to.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Extra entries tolerated before a trim runs.
    #[serde(default = "default_grace")]
    pub grace: usize,

    /// TTL for a found attribute.
    #[serde(default = "default_found_ttl_secs")]
    pub found_ttl_secs: i64,

    /// TTL for a confirmed-absent attribute.
    #[serde(default = "default_absent_ttl_secs")]
    pub absent_ttl_secs: i64,
}

fn default_capacity() -> usize {
    5_000
}

fn default_grace() -> usize {
    100
}

fn default_found_ttl_secs() -> i64 {
    30 * DAY_SECS
}

fn default_absent_ttl_secs() -> i64 {
    3 * DAY_SECS
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            grace: default_grace(),
            found_ttl_secs: default_found_ttl_secs(),
            absent_ttl_secs: default_absent_ttl_secs(),
        }
    }
}

impl CacheLimits {
    /// The size the cache never exceeds.
    pub fn hard_ceiling(&self) -> usize {
        self.capacity.saturating_add(self.grace)
    }

    /// Expiry duration for a TTL class.
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Found => Duration::seconds(self.found_ttl_secs),
            TtlClass::Absent => Duration::seconds(self.absent_ttl_secs),
        }
    }
}

/// Selects the expiry duration of a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// The subject declared an attribute.
    Found,
    /// The subject is confirmed to have none.
    Absent,
}

impl TtlClass {
    pub fn of(value: &Option<Attribute>) -> Self {
        match value {
            Some(_) => Self::Found,
            None => Self::Absent,
        }
    }
}

/// A cached result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `None` = confirmed absent.
    pub value: Option<Attribute>,

    /// Entry is readable strictly before this instant.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Live entry; `None` means confirmed absent.
    Hit(Option<Attribute>),
    /// Never looked up, or expired.
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// The cached attribute, if the subject has one.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::Hit(Some(value)) => Some(value),
            _ => None,
        }
    }
}

/// Live entries at a given revision, ready to persist.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub revision: u64,
    pub entries: PersistedCache,
}

/// Insertion-ordered cache with per-entry expiry and a hard size ceiling.
#[derive(Debug, Clone)]
pub struct ExpiringCache {
    entries: IndexMap<String, CacheEntry>,
    limits: CacheLimits,
    revision: u64,
    persisted_revision: u64,
}

impl ExpiringCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            entries: IndexMap::new(),
            limits,
            revision: 0,
            persisted_revision: 0,
        }
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read an entry, evicting it if it has expired.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> CacheLookup {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => CacheLookup::Hit(entry.value.clone()),
            Some(_) => {
                // Expired entries are already excluded from persistence.
                self.entries.shift_remove(key);
                debug!(subject = key, "cache entry expired");
                CacheLookup::Miss
            }
            None => CacheLookup::Miss,
        }
    }

    /// Read an entry without evicting.
    pub fn peek(&self, key: &str, now: DateTime<Utc>) -> CacheLookup {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => CacheLookup::Hit(entry.value.clone()),
            _ => CacheLookup::Miss,
        }
    }

    /// Store a result. Overwriting keeps the key's insertion position.
    pub fn put(
        &mut self,
        key: &str,
        value: Option<Attribute>,
        class: TtlClass,
        now: DateTime<Utc>,
    ) {
        let expires_at = now + self.limits.ttl(class);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        self.touch();

        if self.entries.len() > self.limits.hard_ceiling() {
            self.cleanup(now);
        }
    }

    /// Remove every entry with `expires_at <= now`.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Remove insertion-oldest entries until at most `target` remain.
    pub fn evict_over_capacity(&mut self, target: usize) -> usize {
        let excess = self.entries.len().saturating_sub(target);
        if excess > 0 {
            self.entries.drain(..excess);
        }
        excess
    }

    /// Expired entries first, then oldest entries down to capacity.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = self.evict_expired(now);
        if self.entries.len() > self.limits.capacity {
            removed += self.evict_over_capacity(self.limits.capacity);
        }
        if removed > 0 {
            self.touch();
            debug!(removed, size = self.entries.len(), "cache cleaned");
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.touch();
        }
    }

    /// Whether anything changed since the last successful persist.
    pub fn is_dirty(&self) -> bool {
        self.revision != self.persisted_revision
    }

    /// Unexpired entries for persistence.
    pub fn serialize_live(&self, now: DateTime<Utc>) -> CacheSnapshot {
        let entries = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| (key.clone(), PersistedEntry::from_entry(entry)))
            .collect();

        CacheSnapshot {
            revision: self.revision,
            entries,
        }
    }

    /// Record that the snapshot taken at `revision` reached storage.
    ///
    /// Writes made after the snapshot keep the cache dirty.
    pub fn mark_persisted(&mut self, revision: u64) {
        if revision > self.persisted_revision {
            self.persisted_revision = revision;
        }
    }

    /// Load persisted entries, dropping expired and legacy ones.
    ///
    /// Returns the number of entries kept.
    pub fn restore(&mut self, persisted: PersistedCache, now: DateTime<Utc>) -> usize {
        let mut dropped = 0usize;
        for (key, stored) in persisted {
            match stored.into_entry() {
                Some(entry) if entry.is_live(now) => {
                    // Entries written since startup are fresher than the file.
                    self.entries.entry(key).or_insert(entry);
                }
                _ => dropped += 1,
            }
        }

        if self.entries.len() > self.limits.capacity {
            self.cleanup(now);
        }

        debug!(kept = self.entries.len(), dropped, "cache restored");
        self.entries.len()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

impl Default for ExpiringCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits(capacity: usize, grace: usize) -> CacheLimits {
        CacheLimits {
            capacity,
            grace,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();

        cache.put("alice", Some("France".into()), TtlClass::Found, now);
        cache.put("bob", None, TtlClass::Absent, now);

        assert_eq!(
            cache.get("alice", now),
            CacheLookup::Hit(Some("France".into()))
        );
        assert_eq!(cache.get("bob", now), CacheLookup::Hit(None));
        assert_eq!(cache.get("carol", now), CacheLookup::Miss);
    }

    #[test]
    fn test_absent_expires_before_found() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();

        cache.put("alice", Some("France".into()), TtlClass::Found, now);
        cache.put("bob", None, TtlClass::Absent, now);

        let found = cache.iter().find(|(k, _)| *k == "alice").unwrap().1.clone();
        let absent = cache.iter().find(|(k, _)| *k == "bob").unwrap().1.clone();
        assert!(absent.expires_at < found.expires_at);
        assert_eq!(found.expires_at - now, Duration::days(30));
        assert_eq!(absent.expires_at - now, Duration::days(3));

        let later = now + Duration::days(4);
        assert_eq!(cache.get("bob", later), CacheLookup::Miss);
        assert!(cache.get("alice", later).is_hit());
    }

    #[test]
    fn test_get_evicts_expired_entry() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();
        cache.put("alice", Some("France".into()), TtlClass::Found, now);

        let expired_at = now + Duration::days(30);
        assert_eq!(cache.get("alice", expired_at), CacheLookup::Miss);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_peek_does_not_evict() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();
        cache.put("alice", Some("France".into()), TtlClass::Found, now);

        let expired_at = now + Duration::days(31);
        assert_eq!(cache.peek("alice", expired_at), CacheLookup::Miss);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_write_burst_never_exceeds_hard_ceiling() {
        let now = Utc::now();
        let limits = CacheLimits::default();
        let ceiling = limits.hard_ceiling();
        let mut cache = ExpiringCache::new(limits);

        for i in 0..10_000 {
            cache.put(
                &format!("user{i}"),
                Some("Spain".into()),
                TtlClass::Found,
                now,
            );
            assert!(cache.len() <= ceiling, "size {} at put {}", cache.len(), i);
        }

        // Newest entries survive, oldest are gone.
        assert!(cache.peek("user9999", now).is_hit());
        assert_eq!(cache.peek("user0", now), CacheLookup::Miss);
    }

    #[test]
    fn test_cleanup_prefers_expired_over_live() {
        let now = Utc::now();
        let mut cache = ExpiringCache::new(small_limits(4, 0));

        // Oldest entry is live, second is short-lived.
        cache.put("old-live", Some("Peru".into()), TtlClass::Found, now);
        cache.put("stale", None, TtlClass::Absent, now);

        let later = now + Duration::days(5);
        cache.put("a", Some("Chile".into()), TtlClass::Found, later);
        cache.put("b", Some("Chile".into()), TtlClass::Found, later);
        cache.put("c", Some("Chile".into()), TtlClass::Found, later);

        assert_eq!(cache.len(), 4);
        assert!(cache.peek("old-live", later).is_hit());
        assert_eq!(cache.peek("stale", later), CacheLookup::Miss);
    }

    #[test]
    fn test_overwrite_keeps_insertion_position() {
        let now = Utc::now();
        let mut cache = ExpiringCache::new(small_limits(2, 0));

        cache.put("first", None, TtlClass::Absent, now);
        cache.put("second", None, TtlClass::Absent, now);
        cache.put("first", Some("Kenya".into()), TtlClass::Found, now);
        cache.put("third", None, TtlClass::Absent, now);

        let keys: Vec<&str> = cache.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["second", "third"]);
    }

    #[test]
    fn test_dirty_tracks_revisions() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();
        assert!(!cache.is_dirty());

        cache.put("alice", Some("France".into()), TtlClass::Found, now);
        let snapshot = cache.serialize_live(now);
        cache.put("bob", None, TtlClass::Absent, now);

        cache.mark_persisted(snapshot.revision);
        assert!(cache.is_dirty(), "write after snapshot keeps cache dirty");

        let snapshot = cache.serialize_live(now);
        cache.mark_persisted(snapshot.revision);
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_serialize_live_excludes_expired() {
        let now = Utc::now();
        let mut cache = ExpiringCache::default();
        cache.put("alice", Some("France".into()), TtlClass::Found, now);
        cache.put("bob", None, TtlClass::Absent, now);

        let snapshot = cache.serialize_live(now + Duration::days(4));
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.entries.contains_key("alice"));
    }

    #[test]
    fn test_restore_drops_expired_and_legacy() {
        let now = Utc::now();
        let mut persisted = PersistedCache::new();
        persisted.insert(
            "alice".into(),
            PersistedEntry::Timed {
                location: Some("France".into()),
                expiry: (now + Duration::days(1)).timestamp_millis(),
            },
        );
        persisted.insert(
            "bob".into(),
            PersistedEntry::Timed {
                location: None,
                expiry: (now - Duration::seconds(1)).timestamp_millis(),
            },
        );
        persisted.insert("carol".into(), PersistedEntry::Legacy(Some("Chad".into())));

        let mut cache = ExpiringCache::default();
        assert_eq!(cache.restore(persisted, now), 1);
        assert!(cache.peek("alice", now).is_hit());
        assert_eq!(cache.peek("bob", now), CacheLookup::Miss);
        assert_eq!(cache.peek("carol", now), CacheLookup::Miss);
        assert!(!cache.is_dirty(), "restoring is not a change");
    }

    #[test]
    fn test_restore_trims_to_capacity() {
        let now = Utc::now();
        let expiry = (now + Duration::days(1)).timestamp_millis();
        let persisted: PersistedCache = (0..10)
            .map(|i| {
                (
                    format!("user{i}"),
                    PersistedEntry::Timed {
                        location: None,
                        expiry,
                    },
                )
            })
            .collect();

        let mut cache = ExpiringCache::new(small_limits(4, 2));
        assert_eq!(cache.restore(persisted, now), 4);
        assert!(cache.peek("user9", now).is_hit());
        assert!(cache.is_dirty());
    }
}
