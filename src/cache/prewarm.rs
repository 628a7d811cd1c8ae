//! Cache pre-warmer and invalidator.
//!
//! Before a job starts, the orchestrator bulk-loads the reference data the
//! job may need (config entries, the organization record, workflow metadata)
//! into the cache under namespaced keys. Write paths that mutate the source
//! data call the matching invalidation helper. All failures here are logged
//! and swallowed: the cache is never a source of truth.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::StoreError;

use super::client::CacheClient;

/// Read access to the business data worth pre-warming. Implemented by the
/// surrounding application over its own record tables.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    /// Config entries for a scope (`None` = global), as key/value pairs.
    async fn config_entries(
        &self,
        scope: Option<&str>,
    ) -> Result<Vec<(String, serde_json::Value)>, StoreError>;

    /// The organization record, if the scope names one.
    async fn organization(&self, org: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Workflow metadata visible to a scope, as name/value pairs.
    async fn workflow_metadata(
        &self,
        scope: Option<&str>,
    ) -> Result<Vec<(String, serde_json::Value)>, StoreError>;
}

pub struct CacheWarmer {
    cache: Arc<dyn CacheClient>,
    reference: Arc<dyn ReferenceData>,
    ttl: Duration,
}

impl CacheWarmer {
    pub fn new(cache: Arc<dyn CacheClient>, reference: Arc<dyn ReferenceData>, ttl: Duration) -> Self {
        Self {
            cache,
            reference,
            ttl,
        }
    }

    fn scope_segment(scope: Option<&str>) -> &str {
        scope.unwrap_or("global")
    }

    pub fn config_key(scope: Option<&str>, key: &str) -> String {
        format!("cfg:{}:{key}", Self::scope_segment(scope))
    }

    pub fn org_key(org: &str) -> String {
        format!("org:{org}")
    }

    pub fn workflow_key(scope: Option<&str>, name: &str) -> String {
        format!("wf:{}:{name}", Self::scope_segment(scope))
    }

    /// Bulk-load reference data for a scope. Non-fatal on every path.
    pub async fn prewarm(&self, scope: Option<&str>) {
        let mut warmed = 0usize;

        match self.reference.config_entries(scope).await {
            Ok(entries) => {
                for (key, value) in entries {
                    warmed += self
                        .store(&Self::config_key(scope, &key), &value)
                        .await as usize;
                }
            }
            Err(err) => warn!(error = %err, "Prewarm: config entries unavailable"),
        }

        if let Some(org) = scope {
            match self.reference.organization(org).await {
                Ok(Some(record)) => {
                    warmed += self.store(&Self::org_key(org), &record).await as usize;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, org = org, "Prewarm: organization unavailable"),
            }
        }

        match self.reference.workflow_metadata(scope).await {
            Ok(entries) => {
                for (name, value) in entries {
                    warmed += self
                        .store(&Self::workflow_key(scope, &name), &value)
                        .await as usize;
                }
            }
            Err(err) => warn!(error = %err, "Prewarm: workflow metadata unavailable"),
        }

        debug!(scope = Self::scope_segment(scope), warmed, "Cache prewarm complete");
    }

    async fn store(&self, key: &str, value: &serde_json::Value) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %key, error = %err, "Prewarm: value not serializable");
                return false;
            }
        };
        match self.cache.set(key, &raw, Some(self.ttl)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "Prewarm: cache write failed");
                false
            }
        }
    }

    /// Invalidate all cached config entries for a scope.
    pub async fn invalidate_config(&self, scope: Option<&str>) {
        let pattern = format!("cfg:{}:*", Self::scope_segment(scope));
        if let Err(err) = self.cache.delete_pattern(&pattern).await {
            warn!(pattern = %pattern, error = %err, "Config invalidation failed");
        }
    }

    /// Invalidate a cached organization record.
    pub async fn invalidate_organization(&self, org: &str) {
        if let Err(err) = self.cache.delete(&Self::org_key(org)).await {
            warn!(org = org, error = %err, "Organization invalidation failed");
        }
    }

    /// Invalidate cached workflow metadata for a scope.
    pub async fn invalidate_workflows(&self, scope: Option<&str>) {
        let pattern = format!("wf:{}:*", Self::scope_segment(scope));
        if let Err(err) = self.cache.delete_pattern(&pattern).await {
            warn!(pattern = %pattern, error = %err, "Workflow invalidation failed");
        }
    }
}
