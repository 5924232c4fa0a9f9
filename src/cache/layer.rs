//! LRU + TTL cache for values derived from the live configuration.
//!
//! # Responsibilities
//! - Hold derived values under string keys with a per-entry TTL
//! - Evict least-recently-used entries once the size bound is reached
//! - Track hit/miss/eviction statistics and access latency
//! - Export and import its whole state
//!
//! # Design Decisions
//! - Independently synchronized with its own mutex; it is not authoritative
//!   and never touches the configuration lock
//! - Recency is a monotonically increasing tick per entry, indexed in a
//!   `BTreeMap`, so the LRU victim is always the first key of that map
//! - Expiry uses wall-clock time so exported timestamps stay meaningful
//!   after an import; expired entries are removed lazily on lookup

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::metrics;
use crate::settings::CacheSettings;

/// A cached value and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    /// Time to live in milliseconds.
    pub ttl: u64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    /// Approximate footprint: serialized length times the size factor.
    pub size: usize,
}

impl CacheEntry {
    /// True once strictly more than `ttl` has elapsed since insertion.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.timestamp).num_milliseconds() > i64::try_from(self.ttl).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
    pub total_size: usize,
    pub evictions: u64,
    pub expirations: u64,
    /// Running mean of `get` latency, in milliseconds.
    pub average_access_time: f64,
}

/// Backup blob consumed wholesale by [`CacheLayer::import_state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheState {
    /// Entries from least to most recently used.
    pub entries: Vec<CacheEntry>,
    pub statistics: CacheStatistics,
    pub options: CacheSettings,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Debug, Default)]
struct Inner {
    options: CacheSettings,
    slots: HashMap<String, Slot>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    access_samples: u64,
    average_access_ms: f64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        let tick = self.bump();
        self.recency.insert(tick, entry.key.clone());
        self.slots.insert(entry.key.clone(), Slot { entry, tick });
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.slots.remove(&key);
        self.evictions += 1;
        metrics::record_cache_eviction();
        tracing::trace!(key = %key, "Evicted least recently used cache entry");
        true
    }

    fn record_access(&mut self, started: Instant) {
        let sample = started.elapsed().as_secs_f64() * 1000.0;
        self.access_samples += 1;
        self.average_access_ms += (sample - self.average_access_ms) / self.access_samples as f64;
    }

    fn statistics(&self) -> CacheStatistics {
        let lookups = self.hits + self.misses;
        CacheStatistics {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            total_entries: self.slots.len(),
            total_size: self.slots.values().map(|s| s.entry.size).sum(),
            evictions: self.evictions,
            expirations: self.expirations,
            average_access_time: self.average_access_ms,
        }
    }
}

/// Bounded LRU cache with per-entry TTL.
#[derive(Debug)]
pub struct CacheLayer {
    inner: Mutex<Inner>,
}

impl CacheLayer {
    pub fn new(options: CacheSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                options,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, refreshing its recency. Expired entries count as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let started = Instant::now();
        let now = Utc::now();
        let mut inner = self.lock();

        let expired = match inner.slots.get(key) {
            None => None,
            Some(slot) => Some(slot.entry.is_expired(now)),
        };
        let result = match expired {
            None => None,
            Some(true) => {
                inner.remove(key);
                inner.expirations += 1;
                None
            }
            Some(false) => {
                let tick = inner.bump();
                let old_tick = inner.slots.get(key).map(|s| s.tick);
                if let Some(old_tick) = old_tick {
                    inner.recency.remove(&old_tick);
                }
                inner.recency.insert(tick, key.to_string());
                inner.slots.get_mut(key).map(|slot| {
                    slot.tick = tick;
                    slot.entry.access_count += 1;
                    slot.entry.last_accessed = now;
                    slot.entry.value.clone()
                })
            }
        };

        if result.is_some() {
            inner.hits += 1;
            metrics::record_cache_hit();
        } else {
            inner.misses += 1;
            metrics::record_cache_miss();
        }
        inner.record_access(started);
        result
    }

    /// Insert or replace `key`. `ttl` defaults to the configured default.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let key = key.into();
        let now = Utc::now();
        let mut inner = self.lock();

        let ttl_ms = ttl.map_or(inner.options.default_ttl_ms, |t| {
            u64::try_from(t.as_millis()).unwrap_or(u64::MAX)
        });
        let size = value.to_string().len() * inner.options.size_factor.max(1);

        inner.remove(&key);
        while inner.slots.len() >= inner.options.max_size.max(1) {
            if !inner.evict_lru() {
                break;
            }
        }
        inner.insert(CacheEntry {
            key,
            value,
            timestamp: now,
            ttl: ttl_ms,
            access_count: 0,
            last_accessed: now,
            size,
        });
        metrics::record_cache_entries(inner.slots.len());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.recency.clear();
        metrics::record_cache_entries(0);
    }

    /// Presence check without touching recency or hit statistics.
    pub fn has(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let expired = match inner.slots.get(key) {
            None => return false,
            Some(slot) => slot.entry.is_expired(Utc::now()),
        };
        if expired {
            inner.remove(key);
            inner.expirations += 1;
        }
        !expired
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        self.lock().statistics()
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// The cache lock is not held while `compute` runs, so concurrent callers
    /// may both compute; the last one to finish wins.
    pub async fn get_or_insert_with<F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Value
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value>,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute().await;
        self.set(key, value.clone(), ttl);
        value
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .slots
            .values()
            .filter(|s| s.entry.is_expired(now))
            .map(|s| s.entry.key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    /// Remove every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_where(|key| key.starts_with(prefix))
    }

    /// Remove every key for which `predicate` holds.
    pub fn invalidate_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .slots
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export_state(&self) -> CacheState {
        let inner = self.lock();
        let entries = inner
            .recency
            .values()
            .filter_map(|key| inner.slots.get(key))
            .map(|slot| slot.entry.clone())
            .collect();
        CacheState {
            entries,
            statistics: inner.statistics(),
            options: inner.options.clone(),
        }
    }

    /// Replace entries, counters and options with `state`.
    pub fn import_state(&self, state: CacheState) {
        let mut inner = self.lock();
        *inner = Inner {
            options: state.options,
            hits: state.statistics.hits,
            misses: state.statistics.misses,
            evictions: state.statistics.evictions,
            expirations: state.statistics.expirations,
            average_access_ms: state.statistics.average_access_time,
            access_samples: state.statistics.hits + state.statistics.misses,
            ..Inner::default()
        };
        for entry in state.entries {
            inner.remove(&entry.key);
            while inner.slots.len() >= inner.options.max_size.max(1) {
                if !inner.evict_lru() {
                    break;
                }
            }
            inner.insert(entry);
        }
        metrics::record_cache_entries(inner.slots.len());
    }
}
