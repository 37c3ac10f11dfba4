//! Byte-bounded LRU cache for hot lookup results.
//!
//! A single coarse mutex guards all operations; every operation is O(1)
//! apart from the eviction loop in `set`, which is bounded by the ratio of
//! the incoming size to the smallest cached entry.

use std::sync::Mutex;

use lru::LruCache;
use serde_json::Value;

use crate::error::KnowledgeError;

/// Default budget: 50 MiB.
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Snapshot of the cache performance counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size_bytes: usize,
    pub max_size_bytes: usize,
    pub entry_count: usize,
    /// `current_size / max_bytes`, 0.0 – 1.0.
    pub utilization: f64,
    /// Hit rate over all requests, 0.0 – 1.0.
    pub hit_rate: f64,
}

struct CacheEntry {
    value: Value,
    size: usize,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    current_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct BoundedCache {
    max_bytes: usize,
    inner: Mutex<CacheInner>,
}

impl BoundedCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                current_size: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.  A miss
    /// does not touch recency.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        match inner.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert `value` under `key`, evicting least-recently-used entries
    /// until the byte budget holds.
    ///
    /// Sizing is the deterministic *shallow* size of the JSON value: string
    /// bytes are counted, container children are charged per slot but not
    /// recursed into.  Callers must not rely on deep-nested container sizes.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), KnowledgeError> {
        let key = key.into();
        let size = shallow_size(&value);
        if size > self.max_bytes {
            return Err(KnowledgeError::OversizedValue {
                size,
                max: self.max_bytes,
            });
        }

        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        // Replace-in-place: subtract the previous size before accounting.
        if let Some(old) = inner.entries.pop(&key) {
            inner.current_size -= old.size;
        }

        // The incoming key is not present during this loop, so eviction can
        // never select it.
        while inner.current_size + size > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size -= evicted.size;
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        inner.current_size += size;
        inner.entries.push(key, CacheEntry { value, size });
        Ok(())
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        match inner.entries.pop(key) {
            Some(entry) => {
                inner.current_size -= entry.size;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
        inner.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").current_size
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            current_size_bytes: inner.current_size,
            max_size_bytes: self.max_bytes,
            entry_count: inner.entries.len(),
            utilization: if self.max_bytes > 0 {
                inner.current_size as f64 / self.max_bytes as f64
            } else {
                0.0
            },
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_statistics(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }
}

/// Deterministic shallow byte size of a JSON value.
///
/// Strings count their UTF-8 bytes plus header overhead; arrays and objects
/// are charged a fixed cost per slot without recursing into children.
fn shallow_size(value: &Value) -> usize {
    const HEADER: usize = 24;
    const SLOT: usize = 16;
    match value {
        Value::Null => 8,
        Value::Bool(_) => 9,
        Value::Number(_) => 16,
        Value::String(s) => HEADER + s.len(),
        Value::Array(items) => HEADER + items.len() * SLOT,
        Value::Object(map) => {
            HEADER
                + map
                    .keys()
                    .map(|k| k.len() + HEADER + SLOT)
                    .sum::<usize>()
        }
    }
}
