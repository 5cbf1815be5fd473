use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::wb::client::Balance;

/// Cached balance entry
#[derive(Clone, Debug)]
struct CacheEntry {
    balance: Balance,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Short-TTL balance cache keeping request volume inside WB's per-minute
/// limits. Keys are blake3 hashes of the API key, so the key itself never
/// sits in the map.
pub struct BalanceCache {
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl BalanceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            cache: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn key(token: &str) -> String {
        blake3::hash(token.as_bytes()).to_hex().to_string()
    }

    /// Get a cached balance if it exists and is not expired
    pub fn get(&self, token: &str) -> Option<Balance> {
        let key = Self::key(token);
        let entry = self.cache.get(&key)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            self.cache.remove(&key);
            None
        } else {
            Some(entry.balance.clone())
        }
    }

    /// Cache a freshly fetched balance
    pub fn insert(&self, token: &str, balance: Balance) {
        self.evict_expired();
        self.cache.insert(
            Self::key(token),
            CacheEntry {
                balance,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove expired entries from the cache
    pub fn evict_expired(&self) {
        let keys_to_remove: Vec<_> = self
            .cache
            .iter()
            .filter(|r| r.value().is_expired(self.ttl))
            .map(|r| r.key().clone())
            .collect();

        for key in keys_to_remove {
            self.cache.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance() -> Balance {
        Balance {
            currency: "RUB".to_string(),
            current: 49985.47,
            for_withdraw: 1200.0,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = BalanceCache::new(60);
        cache.insert("token-a", balance());

        assert_eq!(cache.get("token-a"), Some(balance()));
        assert_eq!(cache.get("token-b"), None);
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let cache = BalanceCache::new(0);
        cache.insert("token-a", balance());

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("token-a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_are_hashed() {
        let cache = BalanceCache::new(60);
        cache.insert("secret-token", balance());

        for entry in cache.cache.iter() {
            assert!(!entry.key().contains("secret-token"));
        }
    }
}
