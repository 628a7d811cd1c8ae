//! # Configuration
//!
//! Process configuration loaded from YAML with per-environment overlays
//! (see [`loader`]), plus the runtime [`resolver`] that merges global and
//! organization-scoped configuration entries with secret dereferencing.

pub mod loader;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use loader::ConfigManager;
pub use resolver::{ConfigEntrySource, ConfigResolver, ConfigValue, SecretVault};

/// Root configuration, mirrored by `config/orchestra.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestraConfig {
    pub orchestration: OrchestrationConfig,
    pub reconciler: ReconcilerConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Concurrency ceiling per worker process.
    pub max_concurrency: usize,
    /// Job timeout applied when the workflow metadata does not set one.
    pub default_timeout_secs: u64,
    /// Added to the job timeout to form the synchronous caller's watchdog.
    pub sync_watchdog_margin_secs: u64,
    /// Results above this serialized size are externalized to the blob store.
    pub inline_result_limit_bytes: usize,
    /// How often a running job re-checks the store for a Cancelling flag
    /// set by another worker.
    pub cancel_poll_interval_ms: u64,
    /// Blocking dequeue wait per loop iteration.
    pub dequeue_wait_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_timeout_secs: 300,
            sync_watchdog_margin_secs: 15,
            inline_result_limit_bytes: 256 * 1024,
            cancel_poll_interval_ms: 1_000,
            dequeue_wait_ms: 2_000,
        }
    }
}

impl OrchestrationConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn sync_watchdog_margin(&self) -> Duration {
        Duration::from_secs(self.sync_watchdog_margin_secs)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }

    pub fn dequeue_wait(&self) -> Duration {
        Duration::from_millis(self.dequeue_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Pending executions older than this are considered stuck.
    pub pending_threshold_secs: u64,
    /// Running executions get a longer grace period; real work takes time.
    pub running_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pending_threshold_secs: 10 * 60,
            running_threshold_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl ReconcilerConfig {
    pub fn pending_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_threshold_secs as i64)
    }

    pub fn running_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.running_threshold_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// Overdue reporting buffer; must exceed the polling interval so normal
    /// polling latency never reads as overdue.
    pub grace_buffer_secs: u64,
    /// Natural intervals under this are flagged as warnings.
    pub min_interval_warning_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            grace_buffer_secs: 120,
            min_interval_warning_secs: 5 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn grace_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_buffer_secs as i64)
    }

    pub fn min_interval_warning(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_interval_warning_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for pre-warmed reference data.
    pub prewarm_ttl_secs: u64,
    /// Default TTL for data-provider results.
    pub result_ttl_secs: u64,
    /// Compute-lock TTL; the backstop for a crashed computer.
    pub lock_ttl_secs: u64,
    pub prewarm_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prewarm_ttl_secs: 10 * 60,
            result_ttl_secs: 5 * 60,
            lock_ttl_secs: 10,
            prewarm_enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn prewarm_ttl(&self) -> Duration {
        Duration::from_secs(self.prewarm_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/orchestra".to_string(),
            pool: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub queue_key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            queue_key: "orchestra:executions".to_string(),
        }
    }
}

impl OrchestraConfig {
    /// Validate invariants that a YAML file can silently violate.
    pub fn validate(&self) -> Result<(), String> {
        if self.orchestration.max_concurrency == 0 {
            return Err("orchestration.max_concurrency must be at least 1".to_string());
        }
        if self.orchestration.default_timeout_secs == 0 {
            return Err("orchestration.default_timeout_secs must be positive".to_string());
        }
        if self.scheduler.grace_buffer_secs <= self.scheduler.poll_interval_secs {
            return Err(
                "scheduler.grace_buffer_secs must exceed scheduler.poll_interval_secs".to_string(),
            );
        }
        if self.reconciler.running_threshold_secs < self.reconciler.pending_threshold_secs {
            return Err(
                "reconciler.running_threshold_secs must be at least the pending threshold"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OrchestraConfig::default().validate().unwrap();
    }

    #[test]
    fn grace_buffer_must_exceed_poll_interval() {
        let mut config = OrchestraConfig::default();
        config.scheduler.grace_buffer_secs = config.scheduler.poll_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = OrchestraConfig::default();
        config.orchestration.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
