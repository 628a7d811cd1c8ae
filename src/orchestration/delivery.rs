//! Synchronous result delivery.
//!
//! A caller that enqueued a synchronous execution blocks on a read from a
//! per-execution channel; the orchestrator pushes exactly one terminal
//! outcome onto that channel on every exit path. A missing push is a
//! correctness bug: it leaves the caller hanging until its watchdog fires.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::{Execution, ExecutionErrorKind, ExecutionStatus};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),
    #[error("malformed delivery message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<redis::RedisError> for DeliveryError {
    fn from(err: redis::RedisError) -> Self {
        DeliveryError::Unavailable(err.to_string())
    }
}

/// Terminal outcome pushed to the synchronous caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub duration_ms: Option<i64>,
}

impl ExecutionOutcome {
    /// Snapshot an outcome from the current record state.
    pub fn from_execution(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            result: execution.result.clone(),
            error: execution.error.clone(),
            error_kind: execution.error_kind.clone(),
            duration_ms: execution.duration_ms,
        }
    }
}

/// Per-execution single-consumer delivery channel.
#[async_trait]
pub trait ResultDelivery: Send + Sync {
    /// Push the terminal outcome. Called exactly once per synchronous
    /// execution.
    async fn push(&self, outcome: ExecutionOutcome) -> Result<(), DeliveryError>;

    /// Blocking read with the caller's own watchdog timeout. `None` on
    /// timeout.
    async fn wait(
        &self,
        execution_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<ExecutionOutcome>, DeliveryError>;
}

/// Mailbox slot lifecycle. `Abandoned` marks a mailbox whose waiter timed
/// out: the push that eventually arrives for it tears the mailbox down
/// instead of parking an outcome nobody will read.
enum Slot {
    Empty,
    Ready(ExecutionOutcome),
    Abandoned,
}

struct Mailbox {
    slot: parking_lot::Mutex<Slot>,
    notify: Notify,
}

/// In-process delivery over per-ID mailboxes. Push-before-wait is fine: the
/// outcome parks in the mailbox until the consumer arrives. Every mailbox is
/// removed either by the wait that consumes it or by the push that finds its
/// waiter gone, so the map only holds in-flight executions.
#[derive(Default)]
pub struct MemoryDelivery {
    mailboxes: DashMap<Uuid, Arc<Mailbox>>,
}

impl MemoryDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, id: Uuid) -> Arc<Mailbox> {
        self.mailboxes
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Mailbox {
                    slot: parking_lot::Mutex::new(Slot::Empty),
                    notify: Notify::new(),
                })
            })
            .clone()
    }
}

#[async_trait]
impl ResultDelivery for MemoryDelivery {
    async fn push(&self, outcome: ExecutionOutcome) -> Result<(), DeliveryError> {
        let id = outcome.execution_id;
        let mailbox = self.mailbox(id);
        let mut slot = mailbox.slot.lock();
        if matches!(*slot, Slot::Abandoned) {
            // The waiter already timed out; drop the outcome and the mailbox.
            drop(slot);
            self.mailboxes.remove(&id);
            return Ok(());
        }
        *slot = Slot::Ready(outcome);
        drop(slot);
        mailbox.notify.notify_one();
        Ok(())
    }

    async fn wait(
        &self,
        execution_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<ExecutionOutcome>, DeliveryError> {
        let mailbox = self.mailbox(execution_id);
        let receive = async {
            loop {
                let notified = mailbox.notify.notified();
                if let Slot::Ready(outcome) =
                    std::mem::replace(&mut *mailbox.slot.lock(), Slot::Empty)
                {
                    return outcome;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(timeout, receive).await {
            Ok(outcome) => {
                self.mailboxes.remove(&execution_id);
                Ok(Some(outcome))
            }
            Err(_) => {
                let mut slot = mailbox.slot.lock();
                if let Slot::Ready(outcome) = std::mem::replace(&mut *slot, Slot::Empty) {
                    // The push landed right at the deadline; take it.
                    drop(slot);
                    self.mailboxes.remove(&execution_id);
                    return Ok(Some(outcome));
                }
                // Leave a tombstone so the late push cleans the entry up.
                *slot = Slot::Abandoned;
                Ok(None)
            }
        }
    }
}

/// Redis-backed delivery: RPUSH to a per-execution list, BLPOP to consume.
/// The list key carries a TTL so an abandoned result does not linger.
pub struct RedisDelivery {
    client: redis::Client,
    key_prefix: String,
    key_ttl: Duration,
}

impl RedisDelivery {
    pub fn new(url: &str, key_prefix: impl Into<String>, key_ttl: Duration) -> Result<Self, DeliveryError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            key_ttl,
        })
    }

    fn key(&self, execution_id: Uuid) -> String {
        format!("{}:{execution_id}", self.key_prefix)
    }
}

#[async_trait]
impl ResultDelivery for RedisDelivery {
    async fn push(&self, outcome: ExecutionOutcome) -> Result<(), DeliveryError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(outcome.execution_id);
        let payload = serde_json::to_string(&outcome)?;
        conn.rpush::<_, _, ()>(&key, payload).await?;
        conn.expire::<_, ()>(&key, self.key_ttl.as_secs() as i64)
            .await?;
        Ok(())
    }

    async fn wait(
        &self,
        execution_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<ExecutionOutcome>, DeliveryError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(execution_id);
        let popped: Option<(String, String)> = conn
            .blpop(&key, timeout.as_secs_f64().max(1.0))
            .await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
