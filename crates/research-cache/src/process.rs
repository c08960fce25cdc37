use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

const MAX_ENTRIES: usize = 4096;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Short-TTL in-memory map collapsing duplicate fetches within one request's
/// fan-out. Keys encode fetch semantics, e.g. `fh_quote_AAPL_2025-11-08`.
#[derive(Default)]
pub struct ProcessCache {
    entries: DashMap<String, Entry>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: &str, value: Value, ttl: Duration) {
        if self.entries.len() >= MAX_ENTRIES {
            self.evict();
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key)?).ok()
    }

    pub fn put_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(json) = serde_json::to_value(value) {
            self.put(key, json, ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries; if the map is still at capacity afterwards,
    /// drops the entries closest to expiry until it fits.
    fn evict(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        if self.entries.len() < MAX_ENTRIES {
            return;
        }
        let mut by_expiry: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, exp)| *exp);
        let overshoot = self.entries.len() + 1 - MAX_ENTRIES;
        for (key, _) in by_expiry.into_iter().take(overshoot) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = ProcessCache::new();
        cache.put("fh_quote_AAPL_2025-11-08", json!(190.1), Duration::from_secs(30));
        assert_eq!(cache.get("fh_quote_AAPL_2025-11-08"), Some(json!(190.1)));

        cache.put("gone", json!(1), Duration::ZERO);
        assert_eq!(cache.get("gone"), None);
        // The expired entry is removed on read.
        assert!(!cache.entries.contains_key("gone"));
    }

    #[test]
    fn typed_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Probe {
            price: f64,
        }
        let cache = ProcessCache::new();
        cache.put_as("p", &Probe { price: 10.0 }, Duration::from_secs(5));
        assert_eq!(cache.get_as::<Probe>("p"), Some(Probe { price: 10.0 }));
    }
}
