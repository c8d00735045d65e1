//! Capacity-bounded TTL cache.
//!
//! All state sits behind one mutex, so every operation (including the
//! expiry check + recency refresh inside [`TtlCache::get`]) is a single
//! critical section. Recency is tracked with a monotonically increasing
//! access sequence: the smallest sequence number is the least recently used
//! entry.
//!
//! Eviction happens only when [`TtlCache::set`] inserts a new key into a full
//! cache (or [`TtlCache::resize`] shrinks it): every expired entry goes first,
//! then least-recently-used entries until the quota (10% of the current
//! size, at least one) is met.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Write as _};
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Keys longer than this are shortened in [`CacheInfo`].
const KEY_PREVIEW_LEN: usize = 50;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_access: Instant,
    seq: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    evictions: u64,
    expired: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    recency: BTreeMap<u64, String>,
    next_seq: u64,
    max_size: usize,
    counters: Counters,
}

impl<V> Inner<V> {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        let _ = self.recency.remove(&entry.seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            let _ = self.remove(key);
        }
        self.counters.expired += expired.len() as u64;
        expired.len()
    }

    /// Remove expired entries, then LRU entries until `quota` removals.
    fn evict(&mut self, quota: usize, now: Instant) -> usize {
        let mut removed = self.purge_expired(now);
        while removed < quota {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            let _ = self.entries.remove(&key);
            self.counters.evictions += 1;
            removed += 1;
        }
        removed
    }
}

/// Point-in-time cache statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored (expired but not yet purged included).
    pub total_items: usize,
    /// Entries still within their TTL.
    pub active_items: usize,
    /// Entries past their TTL awaiting purge.
    pub expired_items: usize,
    /// Capacity.
    pub max_size: usize,
    /// `total_items / max_size` as a percentage (2 dp).
    pub usage_percent: f64,
    /// `hits / (hits + misses)` as a percentage (2 dp).
    pub hit_rate_percent: f64,
    /// Lookups that found a live entry.
    pub total_hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub total_misses: u64,
    /// Insertions and overwrites.
    pub total_sets: u64,
    /// Live entries removed to make room.
    pub total_evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub total_expired: u64,
    /// TTL used when `set` is called without one.
    pub default_ttl_secs: u64,
}

/// Per-entry detail for diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct EntryInfo {
    /// Key, shortened with `...` past 50 characters.
    pub key: String,
    /// Seconds until expiry (0 once expired).
    pub expires_in_secs: f64,
    /// Seconds since the entry was last read or written.
    pub idle_secs: f64,
    /// Whether the TTL has elapsed.
    pub is_expired: bool,
}

/// Statistics plus optional per-entry detail.
#[derive(Clone, Debug, Serialize)]
pub struct CacheInfo {
    /// Aggregate statistics.
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Entries from least to most recently used, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<EntryInfo>>,
}

/// Thread-safe, capacity-bounded key/value cache with per-entry expiry.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_seq: 0,
                max_size: max_size.max(1),
                counters: Counters::default(),
            }),
            default_ttl,
        }
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.entries.get(key).map(|e| now >= e.expires_at) {
            None => {
                inner.counters.misses += 1;
                return None;
            }
            Some(true) => {
                let _ = inner.remove(key);
                inner.counters.expired += 1;
                inner.counters.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        let seq = inner.next_seq();
        let entry = inner.entries.get_mut(key)?;
        let old_seq = std::mem::replace(&mut entry.seq, seq);
        entry.last_access = now;
        let value = entry.value.clone();
        let _ = inner.recency.remove(&old_seq);
        let _ = inner.recency.insert(seq, key.to_string());
        inner.counters.hits += 1;
        Some(value)
    }

    /// Store `value` under `key` for `ttl` (or the default TTL).
    ///
    /// Inserting a new key into a full cache evicts first.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut inner = self.inner.lock();

        let previous = inner.remove(&key);
        if previous.is_none() && inner.entries.len() >= inner.max_size {
            let quota = (inner.entries.len() / 10).max(1);
            let removed = inner.evict(quota, now);
            debug!(removed, "cache full, evicted entries");
        }

        let seq = inner.next_seq();
        let _ = inner.recency.insert(seq, key.clone());
        let _ = inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                last_access: now,
                seq,
            },
        );
        inner.counters.sets += 1;
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        count
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity.
    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// TTL applied when `set` is called without one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.inner.lock().purge_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Change the capacity, evicting the excess when shrinking.
    pub fn resize(&self, new_max: usize) -> usize {
        let new_max = new_max.max(1);
        let mut inner = self.inner.lock();
        let old_max = std::mem::replace(&mut inner.max_size, new_max);
        let excess = inner.entries.len().saturating_sub(new_max);
        let evicted = if excess > 0 {
            inner.evict(excess, Instant::now())
        } else {
            0
        };
        info!(old_max, new_max, evicted, "resized cache");
        evicted
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner.lock();
        self.stats_locked(&inner, now)
    }

    /// Statistics plus, when `include_keys` is set, per-entry detail.
    pub fn info(&self, include_keys: bool) -> CacheInfo {
        let now = Instant::now();
        let inner = self.inner.lock();
        let stats = self.stats_locked(&inner, now);
        let keys = include_keys.then(|| {
            inner
                .recency
                .values()
                .filter_map(|key| inner.entries.get(key).map(|e| (key, e)))
                .map(|(key, entry)| EntryInfo {
                    key: preview_key(key),
                    expires_in_secs: entry.expires_at.saturating_duration_since(now).as_secs_f64(),
                    idle_secs: now.saturating_duration_since(entry.last_access).as_secs_f64(),
                    is_expired: now >= entry.expires_at,
                })
                .collect()
        });
        CacheInfo { stats, keys }
    }

    fn stats_locked(&self, inner: &Inner<V>, now: Instant) -> CacheStats {
        let total_items = inner.entries.len();
        let expired_items = inner
            .entries
            .values()
            .filter(|e| e.expires_at <= now)
            .count();
        let c = &inner.counters;
        let lookups = c.hits + c.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            c.hits as f64 / lookups as f64 * 100.0
        };
        CacheStats {
            total_items,
            active_items: total_items - expired_items,
            expired_items,
            max_size: inner.max_size,
            usage_percent: round2(total_items as f64 / inner.max_size as f64 * 100.0),
            hit_rate_percent: round2(hit_rate),
            total_hits: c.hits,
            total_misses: c.misses,
            total_sets: c.sets,
            total_evictions: c.evictions,
            total_expired: c.expired,
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs outside the lock; concurrent misses may both compute.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: impl FnOnce() -> V,
    ) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone(), ttl);
        value
    }

    /// Async, fallible variant of [`Self::get_or_insert_with`]. Errors are
    /// returned without caching anything.
    pub async fn get_or_try_insert_async<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Insert an entry that is deleted when the returned guard drops.
    pub fn temporary(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
    ) -> TemporaryEntry<'_, V> {
        let key = key.into();
        self.set(key.clone(), value, ttl);
        TemporaryEntry { cache: self, key }
    }
}

/// Scoped cache entry. See [`TtlCache::temporary`].
pub struct TemporaryEntry<'a, V: Clone> {
    cache: &'a TtlCache<V>,
    key: String,
}

impl<V: Clone> TemporaryEntry<'_, V> {
    /// The key the entry is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<V: Clone> Drop for TemporaryEntry<'_, V> {
    fn drop(&mut self) {
        let _ = self.cache.delete(&self.key);
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a, A: ?Sized> {
    prefix: &'a str,
    args: &'a A,
}

/// Derive a stable cache key from a prefix and arguments.
///
/// The arguments are encoded as JSON with sorted object keys and hashed with
/// SHA-256, giving `"{prefix}:{hex digest}"`. Arguments that cannot be
/// encoded (e.g. maps with non-string keys) fall back to a hash of their
/// `Debug` form, which is stable only within one process.
pub fn cache_key<A: Serialize + Debug + ?Sized>(prefix: &str, args: &A) -> String {
    let encoded = serde_json::to_value(KeyMaterial { prefix, args })
        .and_then(|value| serde_json::to_string(&value));
    match encoded {
        Ok(material) => {
            let digest = Sha256::digest(material.as_bytes());
            let mut key = String::with_capacity(prefix.len() + 1 + digest.len() * 2);
            key.push_str(prefix);
            key.push(':');
            for byte in digest {
                let _ = write!(key, "{byte:02x}");
            }
            key
        }
        Err(e) => {
            warn!(prefix, error = %e, "cache key arguments not serializable, using fallback key");
            let mut hasher = DefaultHasher::new();
            format!("{args:?}").hash(&mut hasher);
            format!("{prefix}:{:016x}", hasher.finish())
        }
    }
}

fn preview_key(key: &str) -> String {
    match key.char_indices().nth(KEY_PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &key[..idx]),
        None => key.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
