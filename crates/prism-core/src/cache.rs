//! Capacity- and TTL-bounded cache for compiled build artifacts.
//!
//! Entries are keyed by content hash. The store is bounded by a byte budget
//! (each entry counts `value.len()` bytes) and optionally by an entry count.
//! When an insert would exceed either bound, least-recently-used entries are
//! evicted until both hold again. Independently of capacity, an entry older
//! than the TTL is treated as absent and dropped on the next lookup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use prism_config::CacheConfig;
use serde::Serialize;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<[u8]>,
    size: usize,
    created_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

#[derive(Debug)]
struct Inner {
    lru: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.lru.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry)
    }
}

/// Read-only statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

/// Thread-safe LRU cache of build outputs.
#[derive(Debug)]
pub struct BuildCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    max_entries: Option<usize>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl BuildCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.max_bytes, config.max_entries, config.ttl())
    }

    pub fn with_limits(max_bytes: usize, max_entries: Option<usize>, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_bytes,
            max_entries,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Look up `key`, refreshing its LRU position on a hit.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let lookup = match inner.lru.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                entry.last_accessed = now;
                Ok(Arc::clone(&entry.value))
            }
            Some(_) => Err(true),
            None => Err(false),
        };

        match lookup {
            Ok(value) => {
                drop(inner);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(expired) => {
                if expired {
                    inner.remove(key);
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                drop(inner);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace `key`.
    ///
    /// A value larger than the whole byte budget is not stored (and any
    /// previous value for the key is dropped).
    pub fn set(&self, key: impl Into<String>, value: impl Into<Arc<[u8]>>) {
        let key = key.into();
        let value = value.into();
        let size = value.len();
        let now = Instant::now();

        let mut inner = self.inner.lock();

        if size > self.max_bytes || self.max_entries == Some(0) {
            inner.remove(&key);
            tracing::debug!(key = %key, size, max_bytes = self.max_bytes, "artifact exceeds cache capacity, not cached");
            return;
        }

        let entry = CacheEntry {
            value,
            size,
            created_at: now,
            last_accessed: now,
        };
        if let Some(previous) = inner.lru.put(key, entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(previous.size);
        }
        inner.total_bytes = inner.total_bytes.saturating_add(size);

        let mut evicted = 0;
        while inner.total_bytes > self.max_bytes
            || self.max_entries.is_some_and(|max| inner.lru.len() > max)
        {
            let Some((_key, entry)) = inner.lru.pop_lru() else {
                inner.total_bytes = 0;
                break;
            };
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.size);
            evicted += 1;
        }
        drop(inner);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Whether `key` is present and unexpired. Does not touch LRU order or counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .lru
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl, now))
    }

    /// Time since `key` was last read or written, if present.
    pub fn idle_time(&self, key: &str) -> Option<Duration> {
        self.inner
            .lock()
            .lru
            .peek(key)
            .map(|entry| entry.last_accessed.elapsed())
    }

    /// Drop every entry and reset all counters.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.lru.clear();
            inner.total_bytes = 0;
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    /// Total bytes currently cached.
    pub fn size(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_bytes
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes) = {
            let inner = self.inner.lock();
            (inner.lru.len(), inner.total_bytes)
        };
        CacheStats {
            entries,
            size_bytes,
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            expirations: self.expirations(),
            hit_rate: self.hit_rate(),
        }
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
