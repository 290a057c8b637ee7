//! Key-value store abstraction backing sessions and metrics.
//!
//! Production uses Redis; when it is unreachable at startup the service
//! degrades to a volatile in-memory store with the same semantics rather
//! than failing to boot.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StoreConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Command(err.to_string())
    }
}

/// Contract shared by the networked store and the in-memory fallback.
///
/// Counter keys and record keys live in one namespace; `incr`/`decr`
/// treat a missing key as zero, and `decr` never goes below zero.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value with a fresh TTL. Overwrites any previous value and
    /// resets (not extends) the expiry clock.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Set a value with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns true if a value existed and was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Decrement, clamped at zero.
    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Connect to the configured store, falling back to the in-memory
/// implementation when the initial ping fails.
pub async fn connect(config: &StoreConfig) -> Arc<dyn KvStore> {
    let timeout = Duration::from_secs(config.connect_timeout_seconds);
    match tokio::time::timeout(timeout, RedisStore::connect(&config.url)).await {
        Ok(Ok(store)) => {
            info!("Connected to Redis at {}", config.url);
            Arc::new(store)
        }
        Ok(Err(e)) => {
            warn!("Failed to connect to Redis at {}: {}", config.url, e);
            warn!("Using in-memory fallback (data will not persist)");
            Arc::new(MemoryStore::new())
        }
        Err(_) => {
            warn!(
                "Redis connection to {} timed out after {}s",
                config.url, config.connect_timeout_seconds
            );
            warn!("Using in-memory fallback (data will not persist)");
            Arc::new(MemoryStore::new())
        }
    }
}
