//! Query result cache.
//!
//! Entries are keyed by operation and query fingerprint, expire after a
//! kind-dependent TTL, and are evicted by a combined recency/frequency score
//! when the byte budget would be exceeded.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use memroute_core::{ContentKind, MemoryContent, MemoryQuery, OperationKind, ScoredContent};

use crate::config::CacheConfig;
use crate::utils::{SharedClock, age_secs, query_fingerprint};

/// Cache key for a query issued by one operation kind
pub fn cache_key(operation: OperationKind, query: &MemoryQuery) -> String {
    format!("{}:{}", operation, query_fingerprint(query))
}

/// Cached result of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum CachePayload {
    Content(MemoryContent),
    Contents(Vec<MemoryContent>),
    Scored(Vec<ScoredContent>),
}

impl CachePayload {
    /// All content items carried by the payload
    pub fn items(&self) -> Vec<&MemoryContent> {
        match self {
            Self::Content(c) => vec![c],
            Self::Contents(items) => items.iter().collect(),
            Self::Scored(hits) => hits.iter().map(|h| &h.content).collect(),
        }
    }

    /// The content kind shared by every item, if there is exactly one
    pub fn uniform_kind(&self) -> Option<ContentKind> {
        let items = self.items();
        let first = items.first()?.kind;
        items.iter().all(|c| c.kind == first).then_some(first)
    }

    fn dependency_tags(&self) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        for item in self.items() {
            tags.insert(item.id.clone());
            tags.insert(item.metadata.origin.as_str().to_string());
            tags.insert(item.kind.as_str().to_string());
            if !item.metadata.content_type.is_empty() {
                tags.insert(item.metadata.content_type.clone());
            }
            tags.extend(item.metadata.dependencies.iter().cloned());
        }
        tags
    }
}

/// One cached entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachePayload,
    pub inserted_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
    pub ttl: Duration,
    /// Estimated bytes: serialized payload plus key
    pub size_bytes: usize,
    pub tags: BTreeSet<String>,
    /// Inserted by the predictive loader and not yet hit
    pub preloaded: bool,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.inserted_at > self.ttl
    }

    /// Lower scores are evicted first
    fn eviction_score(&self, now: DateTime<Utc>) -> f64 {
        let age = age_secs(self.inserted_at, now).max(0.001);
        self.access_count as f64 / age
    }
}

/// Result of a cache hit
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: CachePayload,
    /// The hit consumed a predictively loaded entry
    pub was_preloaded: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    size: usize,
    hits: u64,
    misses: u64,
    expired: u64,
    evictions: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.size = self.size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_where(&mut self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|e| pred(e))
            .map(|e| e.key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let removed = self.remove_where(|e| e.is_expired(now));
        self.expired += removed as u64;
        removed
    }

    /// Free room for `incoming` bytes
    fn make_room(&mut self, incoming: usize, max: usize, target_ratio: f64, now: DateTime<Utc>) {
        if self.size + incoming <= max {
            return;
        }
        self.purge_expired(now);
        if self.size + incoming <= max {
            return;
        }

        let mut victims: Vec<(f64, DateTime<Utc>, String)> = self
            .entries
            .values()
            .map(|e| (e.eviction_score(now), e.last_access, e.key.clone()))
            .collect();
        victims.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        let target = (max as f64 * target_ratio) as usize;
        let mut victims = victims.into_iter();
        while self.size > target || self.size + incoming > max {
            let Some((_, _, key)) = victims.next() else {
                break;
            };
            if self.remove(&key).is_some() {
                self.evictions += 1;
            }
        }
        debug!(
            bytes = self.size,
            evictions = self.evictions,
            "Cache eviction pass complete"
        );
    }
}

/// Size-bounded query cache
pub struct QueryCache {
    config: CacheConfig,
    clock: SharedClock,
    inner: Mutex<CacheInner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// TTL for a payload of the given kind and serialized size
    pub fn ttl_for(&self, kind: Option<ContentKind>, payload_bytes: usize) -> Duration {
        let mut secs = self.config.ttl_secs_for(kind);
        if payload_bytes > self.config.large_payload_bytes {
            secs /= 2;
        }
        Duration::seconds(secs as i64)
    }

    /// Look up a key. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<CacheHit> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.remove(key);
            inner.expired += 1;
            inner.misses += 1;
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        inner.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access = now;
        let was_preloaded = entry.preloaded;
        entry.preloaded = false;
        Some(CacheHit {
            payload: entry.payload.clone(),
            was_preloaded,
        })
    }

    /// Whether a live entry exists, without touching statistics
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Live payload for a key, without touching statistics or access counts
    pub fn peek(&self, key: &str) -> Option<CachePayload> {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.payload.clone())
    }

    /// Insert a payload. Returns false when the payload was not cached.
    pub fn insert(
        &self,
        key: &str,
        identifier: Option<&str>,
        payload: CachePayload,
        preloaded: bool,
    ) -> bool {
        let payload_bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!(key = %key, error = %e, "Payload not serializable, skipping cache");
                return false;
            }
        };
        let size_bytes = payload_bytes + key.len();
        let max = self.config.max_bytes;

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.remove(key);

        if size_bytes > max {
            debug!(key = %key, size_bytes, max, "Payload larger than cache");
            return false;
        }

        inner.make_room(size_bytes, max, self.config.eviction_target_ratio, now);

        let mut tags = payload.dependency_tags();
        if let Some(id) = identifier {
            tags.insert(id.to_string());
        }
        let ttl = self.ttl_for(payload.uniform_kind(), payload_bytes);
        inner.size += size_bytes;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                payload,
                inserted_at: now,
                last_access: now,
                access_count: 0,
                ttl,
                size_bytes,
                tags,
                preloaded,
            },
        );
        true
    }

    /// Remove entries keyed or tagged by `identifier`; `None` clears everything.
    pub fn invalidate(&self, identifier: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        match identifier {
            Some(id) => inner.remove_where(|e| e.key == id || e.tags.contains(id)),
            None => {
                let count = inner.entries.len();
                inner.entries.clear();
                inner.size = 0;
                count
            }
        }
    }

    /// Remove entries tagged with the origin, kind or content type of `content`
    pub fn invalidate_relevant(&self, content: &MemoryContent) -> usize {
        let mut wanted = vec![
            content.metadata.origin.as_str().to_string(),
            content.kind.as_str().to_string(),
        ];
        if !content.metadata.content_type.is_empty() {
            wanted.push(content.metadata.content_type.clone());
        }
        let removed = self
            .inner
            .lock()
            .remove_where(|e| wanted.iter().any(|t| e.tags.contains(t)));
        if removed > 0 {
            debug!(id = %content.id, removed, "Invalidated related cache entries");
        }
        removed
    }

    /// Sweep expired entries
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().purge_expired(now)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            expired: inner.expired,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            bytes: inner.size,
            max_bytes: self.config.max_bytes,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total estimated bytes held
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size
    }

    /// Snapshot of one entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{Clock, ManualClock};
    use memroute_core::BackendKind;
    use std::sync::Arc;

    fn setup(config: CacheConfig) -> (QueryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (QueryCache::new(config, clock.clone()), clock)
    }

    fn item(kind: ContentKind, id: &str) -> CachePayload {
        CachePayload::Content(MemoryContent::new(kind, format!("body of {}", id)).with_id(id))
    }

    fn key(id: &str) -> String {
        cache_key(OperationKind::Read, &MemoryQuery::for_identifier(id))
    }

    #[test]
    fn test_ttl_boundaries_per_kind() {
        for (kind, secs) in [
            (ContentKind::Session, 600),
            (ContentKind::Pattern, 1800),
            (ContentKind::Architectural, 3600),
            (ContentKind::Project, 300),
            (ContentKind::Semantic, 300),
        ] {
            let (cache, clock) = setup(CacheConfig::default());
            assert!(cache.insert(&key("a"), Some("a"), item(kind, "a"), false));

            clock.advance(Duration::seconds(secs) - Duration::milliseconds(1));
            assert!(cache.get(&key("a")).is_some(), "{} should hit before ttl", kind);

            clock.advance(Duration::milliseconds(2));
            assert!(cache.get(&key("a")).is_none(), "{} should miss after ttl", kind);
            assert_eq!(cache.stats().expired, 1);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_large_payload_halves_ttl() {
        let config = CacheConfig {
            large_payload_bytes: 64,
            ..Default::default()
        };
        let (cache, _) = setup(config);
        assert_eq!(cache.ttl_for(Some(ContentKind::Pattern), 10), Duration::seconds(1800));
        assert_eq!(cache.ttl_for(Some(ContentKind::Pattern), 65), Duration::seconds(900));
    }

    #[test]
    fn test_mixed_kinds_use_default_ttl() {
        let (cache, _) = setup(CacheConfig::default());
        let payload = CachePayload::Contents(vec![
            MemoryContent::new(ContentKind::Session, "a"),
            MemoryContent::new(ContentKind::Pattern, "b"),
        ]);
        assert_eq!(payload.uniform_kind(), None);
        cache.insert("list:x", None, payload, false);
        assert_eq!(cache.entry("list:x").unwrap().ttl, Duration::seconds(300));
    }

    #[test]
    fn test_hit_updates_access_stats() {
        let (cache, clock) = setup(CacheConfig::default());
        cache.insert(&key("a"), Some("a"), item(ContentKind::Pattern, "a"), false);
        clock.advance(Duration::seconds(5));

        cache.get(&key("a"));
        cache.get(&key("a"));
        assert!(cache.get(&key("b")).is_none());

        let entry = cache.entry(&key("a")).unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_access, clock.now());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_peek_leaves_stats_alone() {
        let (cache, clock) = setup(CacheConfig::default());
        cache.insert(&key("a"), Some("a"), item(ContentKind::Session, "a"), false);

        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("b")).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
        assert_eq!(cache.entry(&key("a")).unwrap().access_count, 0);

        clock.advance(Duration::hours(2));
        assert!(cache.peek(&key("a")).is_none());
    }

    #[test]
    fn test_capacity_invariant_and_eviction_target() {
        let config = CacheConfig {
            max_bytes: 4_000,
            ..Default::default()
        };
        let (cache, clock) = setup(config);

        for i in 0..200 {
            let id = format!("item-{}", i);
            cache.insert(&key(&id), Some(&id), item(ContentKind::Pattern, &id), false);
            assert!(cache.size_bytes() <= 4_000);
            if i % 3 == 0 {
                cache.get(&key(&id));
            }
            clock.advance(Duration::milliseconds(10));
        }

        let stats = cache.stats();
        assert!(stats.evictions > 0);
        assert!(stats.bytes <= 4_000);
    }

    #[test]
    fn test_eviction_reaches_eighty_percent() {
        let config = CacheConfig {
            max_bytes: 2_000,
            ..Default::default()
        };
        let (cache, clock) = setup(config);

        let mut i = 0;
        while cache.stats().evictions == 0 {
            let id = format!("item-{}", i);
            let before = cache.size_bytes();
            cache.insert(&key(&id), Some(&id), item(ContentKind::Pattern, &id), false);
            if cache.stats().evictions > 0 {
                let entry = cache.entry(&key(&id)).unwrap();
                assert!(before + entry.size_bytes > 2_000);
                assert!(cache.size_bytes() - entry.size_bytes <= 1_600);
            }
            clock.advance(Duration::seconds(1));
            i += 1;
        }
    }

    #[test]
    fn test_frequently_used_entries_survive() {
        let config = CacheConfig {
            max_bytes: 1_000,
            ..Default::default()
        };
        let (cache, clock) = setup(config);
        cache.insert(&key("hot"), Some("hot"), item(ContentKind::Pattern, "hot"), false);
        for _ in 0..10 {
            cache.get(&key("hot"));
        }
        clock.advance(Duration::seconds(1));

        for i in 0..30 {
            let id = format!("cold-{}", i);
            cache.insert(&key(&id), Some(&id), item(ContentKind::Pattern, &id), false);
            clock.advance(Duration::seconds(1));
        }
        assert!(cache.contains(&key("hot")));
    }

    #[test]
    fn test_oversized_payload_not_cached() {
        let config = CacheConfig {
            max_bytes: 100,
            ..Default::default()
        };
        let (cache, _) = setup(config);
        let big = CachePayload::Content(MemoryContent::new(ContentKind::Session, "x".repeat(500)));
        assert!(!cache.insert("k", None, big, false));
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_targeted_invalidation() {
        let (cache, _) = setup(CacheConfig::default());
        cache.insert(&key("a"), Some("a"), item(ContentKind::Pattern, "a"), false);
        cache.insert(&key("b"), Some("b"), item(ContentKind::Pattern, "b"), false);
        let dependent = MemoryContent::new(ContentKind::Session, "uses a")
            .with_id("c")
            .with_dependency("a");
        cache.insert(&key("c"), Some("c"), CachePayload::Content(dependent), false);

        assert_eq!(cache.invalidate(Some("a")), 2);
        assert!(cache.contains(&key("b")));
        assert_eq!(cache.invalidate(None), 1);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_invalidate_relevant_by_kind_and_origin() {
        let (cache, _) = setup(CacheConfig::default());
        let structured = MemoryContent::new(ContentKind::Project, "p")
            .with_id("p")
            .with_origin(BackendKind::Structured);
        cache.insert(&key("p"), Some("p"), CachePayload::Content(structured), false);
        cache.insert(&key("s"), Some("s"), item(ContentKind::Session, "s"), false);

        let incoming = MemoryContent::new(ContentKind::Pattern, "new")
            .with_origin(BackendKind::Structured);
        assert_eq!(cache.invalidate_relevant(&incoming), 1);
        assert!(cache.contains(&key("s")));
    }

    #[test]
    fn test_preloaded_flag_reported_once() {
        let (cache, _) = setup(CacheConfig::default());
        cache.insert(&key("a"), Some("a"), item(ContentKind::Session, "a"), true);
        assert!(cache.get(&key("a")).unwrap().was_preloaded);
        assert!(!cache.get(&key("a")).unwrap().was_preloaded);
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = setup(CacheConfig::default());
        cache.insert(&key("s"), Some("s"), item(ContentKind::Session, "s"), false);
        cache.insert(&key("p"), Some("p"), item(ContentKind::Pattern, "p"), false);
        clock.advance(Duration::minutes(11));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
