//! Pluggable key/value cache used by the directory's cache-aside reads.
//!
//! Values are opaque bytes with a sliding expiration window. The cache is
//! never authoritative: callers treat every `CacheError` as a miss or a no-op.

use async_trait::async_trait;
use scc::HashMap;
use scc::hash_map::Entry;
use std::time::Duration;
use tokio::time::Instant;

/// Cache key for a server's read-model projection.
pub fn server_key(server_id: &str) -> String {
    format!("server:{server_id}")
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a value. A hit extends the entry's expiration by its TTL.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Drop a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

/// Process-local cache on a lock-free map.
pub struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Number of stored entries, including ones that expired but were not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present and not yet expired. Does not slide the window.
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read_async(key, |_, entry| entry.expires_at > now)
            .await
            .unwrap_or(false)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();

        let hit = self
            .entries
            .update_async(key, |_, entry| {
                if entry.expires_at <= now {
                    None
                } else {
                    entry.expires_at = now + entry.ttl;
                    Some(entry.value.clone())
                }
            })
            .await;

        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                // Expired: drop it so the map doesn't keep dead projections around
                let _ = self.entries.remove_async(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }

        let entry = CacheEntry {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };

        match self.entries.entry_async(key.to_string()).await {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = entry;
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(entry);
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let _ = self.entries.remove_async(key).await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache entry ttl must be non-zero")]
    ZeroTtl,
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cached value could not be decoded: {0}")]
    Corrupt(String),
}
