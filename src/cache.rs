//! Identity-keyed response cache with freshness and retention windows.
//!
//! Doubles as the request-deduplication layer: a fresh hit means the
//! caller skips the network entirely, while an aged hit is still served
//! for display during a background refetch.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    stored_at: Instant,
    last_used: Instant,
}

/// TTL cache over cloneable values.
///
/// `fresh_for` bounds how long an entry short-circuits a refetch;
/// `keep_for` bounds how long an unused entry is retained at all.
pub struct QueryCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    fresh_for: Duration,
    keep_for: Duration,
}

impl<K: Eq + Hash, V: Clone> QueryCache<K, V> {
    pub fn new(fresh_for: Duration, keep_for: Duration) -> Self {
        QueryCache {
            entries: HashMap::new(),
            fresh_for,
            keep_for,
        }
    }

    /// The cached value if it is still within the freshness window.
    pub fn fresh(&mut self, key: &K) -> Option<V> {
        let fresh_for = self.fresh_for;
        let entry = self.entries.get_mut(key)?;
        if entry.stored_at.elapsed() > fresh_for {
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    /// The cached value regardless of age (stale-while-revalidate path).
    pub fn cached(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        let now = Instant::now();
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                last_used: now,
            },
        );
        self.purge_expired();
    }

    /// Drop entries nobody has touched within the retention window.
    pub fn purge_expired(&mut self) {
        let keep_for = self.keep_for;
        self.entries
            .retain(|_, entry| entry.last_used.elapsed() <= keep_for);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
