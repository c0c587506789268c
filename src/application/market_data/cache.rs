//! Generic TTL cache, generalized from the teacher's `SpreadCache`
//! (`application/market_data/spread_cache.rs`), which kept a
//! `RwLock<HashMap<Symbol, SpreadData>>` with poisoned-lock recovery. Used for
//! ticks/L1/L2/1s-bars/VRE-state per §9.8 (KV cache, not durable-store backed).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

pub struct TtlCache<K, V> {
    ttl_seconds: i64,
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, key: K, value: V) {
        self.lock_write().insert(key, Entry { value, inserted_at: Utc::now() });
    }

    /// Returns the value and its age in seconds if present and not expired.
    pub fn get(&self, key: &K) -> Option<(V, i64)> {
        let guard = self.lock_read();
        let entry = guard.get(key)?;
        let age = (Utc::now() - entry.inserted_at).num_seconds();
        if age > self.ttl_seconds {
            None
        } else {
            Some((entry.value.clone(), age))
        }
    }

    /// Returns the value regardless of TTL, with its age — used by the
    /// staleness guard, which needs to observe *how* stale data is rather
    /// than have it silently disappear at the TTL boundary.
    pub fn get_raw(&self, key: &K) -> Option<(V, i64)> {
        let guard = self.lock_read();
        let entry = guard.get(key)?;
        let age = (Utc::now() - entry.inserted_at).num_seconds();
        Some((entry.value.clone(), age))
    }

    pub fn purge_expired(&self) {
        let mut guard = self.lock_write();
        let ttl = self.ttl_seconds;
        guard.retain(|_, e| (Utc::now() - e.inserted_at).num_seconds() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.lock_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let cache: TtlCache<String, i32> = TtlCache::new(60);
        cache.insert("a".to_string(), 42);
        let (v, age) = cache.get(&"a".to_string()).unwrap();
        assert_eq!(v, 42);
        assert!(age >= 0);
    }

    #[test]
    fn missing_key_returns_none() {
        let cache: TtlCache<String, i32> = TtlCache::new(60);
        assert!(cache.get(&"missing".to_string()).is_none());
    }
}
