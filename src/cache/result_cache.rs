//! # Result Cache
//!
//! TTL-bound cache of computed data-provider results with stampede
//! protection: a short-lived advisory lock prevents concurrent callers from
//! recomputing the same expensive result.
//!
//! The cache is advisory. A miss, an expired entry and a cache error all read
//! as "not found"; lock-infrastructure failure degrades to unprotected
//! compute rather than blocking anyone.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::client::{CacheClient, CacheError};

const LOCK_SUFFIX: &str = ":lock";
const LOCK_MARKER: &str = "1";

pub struct ResultCache {
    cache: Arc<dyn CacheClient>,
}

impl ResultCache {
    pub fn new(cache: Arc<dyn CacheClient>) -> Self {
        Self { cache }
    }

    /// Cache key: scope + provider name + hash of normalized parameters.
    pub fn cache_key(scope: Option<&str>, name: &str, params: &serde_json::Value) -> String {
        let scope = scope.unwrap_or("global");
        format!("dp:{scope}:{name}:{}", params_hash(params))
    }

    fn lock_key(scope: Option<&str>, name: &str, params: &serde_json::Value) -> String {
        format!("{}{LOCK_SUFFIX}", Self::cache_key(scope, name, params))
    }

    /// Look up a cached result. Miss, expiry and cache failure are all
    /// `None`.
    pub async fn get(
        &self,
        scope: Option<&str>,
        name: &str,
        params: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        let key = Self::cache_key(scope, name, params);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key = %key, error = %err, "Discarding undecodable result-cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "Result cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a computed result with expiry.
    pub async fn set(
        &self,
        scope: Option<&str>,
        name: &str,
        params: &serde_json::Value,
        result: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = Self::cache_key(scope, name, params);
        let raw = serde_json::to_string(result)?;
        self.cache.set(&key, &raw, Some(ttl)).await
    }

    /// Single non-blocking attempt to take the compute lock.
    ///
    /// Returns `true` when this caller should compute. Lock-infra failure
    /// also returns `true`: a lock outage must never block computation.
    pub async fn acquire_compute_lock(
        &self,
        scope: Option<&str>,
        name: &str,
        params: &serde_json::Value,
        ttl: Duration,
    ) -> bool {
        let key = Self::lock_key(scope, name, params);
        match self.cache.set_nx(&key, LOCK_MARKER, ttl).await {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(key = %key, error = %err, "Compute lock unavailable, proceeding unprotected");
                true
            }
        }
    }

    /// Explicitly release the compute lock after `set`. The lock TTL remains
    /// the backstop for a computer that crashed before releasing.
    pub async fn release_compute_lock(
        &self,
        scope: Option<&str>,
        name: &str,
        params: &serde_json::Value,
    ) {
        let key = Self::lock_key(scope, name, params);
        if let Err(err) = self.cache.delete(&key).await {
            warn!(key = %key, error = %err, "Failed to release compute lock, TTL will expire it");
        }
    }

    /// Drop every cached result (and lock) for a provider.
    pub async fn invalidate_provider(&self, scope: Option<&str>, name: &str) {
        let scope = scope.unwrap_or("global");
        let pattern = format!("dp:{scope}:{name}:*");
        if let Err(err) = self.cache.delete_pattern(&pattern).await {
            warn!(pattern = %pattern, error = %err, "Result cache invalidation failed");
        }
    }
}

/// Deterministic hash of normalized parameters: object keys are sorted
/// recursively before serialization so logically equal inputs share a key.
pub fn params_hash(params: &serde_json::Value) -> String {
    let normalized = normalize(params);
    let serialized = serde_json::to_string(&normalized).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn normalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<_, _> = map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(normalize).collect())
        }
        other => other.clone(),
    }
}
