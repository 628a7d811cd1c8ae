//! Crate-level error type.
//!
//! Layer errors (`StoreError`, `CacheError`, `QueueError`, ...) live next to
//! their layers; this enum is what crosses module boundaries. Cache and lock
//! failures never travel this path as hard errors: they are logged and
//! degraded at the call site per the propagation policy.

use crate::cache::CacheError;
use crate::orchestration::delivery::DeliveryError;
use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, OrchestraError>;
