//! In-memory cache used by tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::client::{glob_match, CacheClient, CacheError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Lazy eviction on read.
        self.entries.remove_if(key, |_, entry| entry.expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        // The entry API holds the shard lock, making check-and-insert atomic.
        let mut created = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expired() {
                    entry.value = value.to_string();
                    entry.expires_at = Some(Instant::now() + ttl);
                    created = true;
                }
            })
            .or_insert_with(|| {
                created = true;
                Entry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                }
            });
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        Ok(u64::from(self.entries.remove(key).is_some()))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        // Counted inside the sweep: a len-before/len-after diff would be
        // skewed by concurrent inserts.
        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            if glob_match(pattern, key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expired() {
            return Ok(None);
        }
        Ok(entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now())))
    }
}
