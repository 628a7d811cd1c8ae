//! Execution request queue.
//!
//! One logical queue per execution type; multiple workers consume from it
//! concurrently. The memory backend serves tests and embedded deployments,
//! the Redis backend production.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::ExecutionRequest;

pub use self::redis::RedisQueue;
pub use memory::MemoryQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("malformed queue message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("queue closed")]
    Closed,
}

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<(), QueueError>;

    /// Blocking pop: waits up to `wait` for a message, `None` on timeout.
    async fn dequeue(&self, wait: Duration) -> Result<Option<ExecutionRequest>, QueueError>;
}
