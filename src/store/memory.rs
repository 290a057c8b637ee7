use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Volatile in-memory store with the same contract as [`RedisStore`].
///
/// Expiry is lazy: an expired entry is dropped on the next access that
/// touches its key. Counters are plain integers serialized as strings so
/// that `get` on a counter key behaves the way Redis does.
///
/// [`RedisStore`]: super::RedisStore
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Read through the expiry check, removing the entry when stale.
    fn live_value(&self, key: &str) -> Option<String> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            drop(entry); // release the read guard before removal
            self.data.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    fn counter_value(&self, key: &str) -> Result<i64, StoreError> {
        match self.live_value(key) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::Command(format!("key {key} holds a non-integer value"))),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.live_value(key).is_some();
        self.data.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let next = self.counter_value(key)? + 1;
        self.data.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let next = (self.counter_value(key)? - 1).max(0);
        self.data.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryStore::new();

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counters_start_at_zero_and_clamp() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.decr("c").await.unwrap(), 1);
        assert_eq!(store.decr("c").await.unwrap(), 0);
        // Unmatched decrement stays at the floor.
        assert_eq!(store.decr("c").await.unwrap(), 0);

        // Counter keys read back as plain strings, like Redis.
        assert_eq!(store.get("c").await.unwrap(), Some("0".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let store = MemoryStore::new();

        store.set_ex("k", "v", 1).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_ex_resets_ttl() {
        let store = MemoryStore::new();

        store.set_ex("k", "v1", 1).await.unwrap();
        store.set_ex("k", "v2", 60).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_string()));
    }
}
