//! In-process result cache: LRU eviction with TTL expiry.
//!
//! One structure owns both the map and the access order (`lru::LruCache`)
//! behind a single mutex, so get/put/invalidate are atomic with respect to
//! concurrent requests. There is no cross-process coherence; multi-instance
//! deployments accept bounded staleness within the TTL.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::filter::{CompiledFilter, Fingerprint};
use crate::model::SearchHit;

/// Cache key: 128-bit truncated SHA-256 of the canonical request form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 16]);

/// Derive the canonical cache key for `(query, filter, k)`.
///
/// The query is trimmed, whitespace-collapsed, lower-cased, and
/// NFC-normalized; the filter contributes its canonical serialization
/// (sorted ids, fixed field order, quantized floats). Permuting wire key
/// order or renormalizing whitespace therefore cannot change the key.
pub fn key_for(query: &str, filter: &CompiledFilter, k: usize) -> CacheKey {
    let canonical_query: String = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .nfc()
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(canonical_query.as_bytes());
    hasher.update([0x1f]);
    hasher.update(filter.canonical_json().as_bytes());
    hasher.update([0x1f]);
    hasher.update((k as u64).to_le_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    CacheKey(key)
}

struct Entry {
    hits: Vec<SearchHit>,
    fingerprint: Fingerprint,
    inserted_at: Instant,
}

/// Monotonic cache counters, readable through the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// LRU+TTL cache of search results.
pub struct ResultCache {
    inner: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries, each valid for
    /// `ttl` after insertion.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Look up a key. A fresh entry moves to MRU and returns a defensive
    /// copy; an expired entry is dropped and counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<SearchHit>> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let expired = inner
            .peek(key)
            .map(|entry| entry.inserted_at.elapsed() > self.ttl);
        match expired {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(true) => {
                inner.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(false) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                // get() (unlike peek) promotes the entry to MRU
                inner.get(key).map(|entry| entry.hits.clone())
            }
        }
    }

    /// Insert at MRU, evicting the LRU entry when at capacity.
    pub fn put(&self, key: CacheKey, fingerprint: Fingerprint, hits: Vec<SearchHit>) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let evicted = inner.push(
            key,
            Entry {
                hits,
                fingerprint,
                inserted_at: Instant::now(),
            },
        );
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every entry whose filter fingerprint matches (coarse
    /// invalidation, e.g. on a taxonomy version change). Returns the number
    /// of entries removed.
    pub fn invalidate_prefix(&self, fingerprint: Fingerprint) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let doomed: Vec<CacheKey> = inner
            .iter()
            .filter(|(_, entry)| entry.fingerprint == fingerprint)
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            inner.pop(key);
        }
        self.invalidations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Drop all entries. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let n = inner.len();
        inner.clear();
        self.invalidations.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
