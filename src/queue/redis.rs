//! Redis-backed execution queue (LPUSH producer, BRPOP consumer).

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::ExecutionRequest;

use super::{ExecutionQueue, QueueError};

pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
}

impl RedisQueue {
    pub fn new(url: &str, queue_key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            queue_key: queue_key.into(),
        })
    }
}

#[async_trait]
impl ExecutionQueue for RedisQueue {
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(request)?;
        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<ExecutionRequest>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // BRPOP returns (key, value); a zero timeout would block forever, so
        // clamp to at least one second.
        let popped: Option<(String, String)> = conn
            .brpop(&self.queue_key, wait.as_secs_f64().max(1.0))
            .await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
