// =============================================================================
// TTL Cache — in-memory map with per-entry monotonic expiry
// =============================================================================
//
// Backs the provider gateway's request coalescing. Expired entries are evicted
// lazily on `get`; there is no background sweeper and no capacity bound —
// callers keep the key space small by deriving keys deterministically from
// `(path, sorted query)`.
//
// Expiry uses the monotonic clock (`Instant`), never wall time.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Thread-safe key→payload cache with per-entry time-to-live.
pub struct TtlCache {
    entries: RwLock<HashMap<String, (Instant, serde_json::Value)>>,
}

impl TtlCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up `key`. Returns a clone of the payload if present and not yet
    /// expired; an expired entry is removed on the spot.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some((expires_at, value)) => {
                    if Instant::now() < *expires_at {
                        return Some(value.clone());
                    }
                    true
                }
                None => false,
            }
        };

        if expired {
            self.entries.write().remove(key);
        }
        None
    }

    /// Insert `value` under `key`, expiring `ttl` from now. Replaces any
    /// existing entry.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.entries
            .write()
            .insert(key.to_string(), (Instant::now() + ttl, value));
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_returns_value() {
        let cache = TtlCache::new();
        cache.set("k", json!({"a": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn missing_key_returns_none() {
        let cache = TtlCache::new();
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let cache = TtlCache::new();
        cache.set("k", json!(42), Duration::from_secs(0));
        // A zero TTL is already expired by the time we read it back.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_existing_entry() {
        let cache = TtlCache::new();
        cache.set("k", json!(1), Duration::from_secs(60));
        cache.set("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = std::sync::Arc::new(TtlCache::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let c = cache.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("k{}", j % 10);
                    c.set(&key, json!(i), Duration::from_secs(60));
                    let _ = c.get(&key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 10);
    }
}
