//! Cache client interface.
//!
//! The cache is a disposable projection: every error it can produce maps to
//! [`CacheError`] and is non-fatal to callers. Losing the entire cache must
//! never lose correctness, only performance.

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Key-value cache with TTL, atomic conditional set and pattern delete.
///
/// Implementations hold no state between calls; each operation stands alone.
/// Values are strings (callers serialize JSON where needed).
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Fetch a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value, with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Atomic create-if-absent with TTL; returns whether the key was created.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Delete a single key; returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, CacheError>;

    /// Delete every key matching a glob pattern (`*` wildcard); returns the
    /// number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Remaining time-to-live for a key; `None` when the key is absent or
    /// has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;
}

/// Glob match supporting `*` wildcards, shared by cache backends that scan
/// keys themselves.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(pattern: &[u8], key: &[u8]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], key) || (!key.is_empty() && inner(pattern, &key[1..]))
            }
            (Some(p), Some(k)) if p == k => inner(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}
