//! In-memory queue over a tokio mpsc channel.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::models::ExecutionRequest;

use super::{ExecutionQueue, QueueError};

pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<ExecutionRequest>,
    // Single receiver shared by all workers; dequeue contends on the lock.
    receiver: Mutex<mpsc::UnboundedReceiver<ExecutionRequest>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionQueue for MemoryQueue {
    async fn enqueue(&self, request: &ExecutionRequest) -> Result<(), QueueError> {
        self.sender
            .send(request.clone())
            .map_err(|_| QueueError::Closed)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<ExecutionRequest>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(wait, receiver.recv()).await {
            Ok(Some(request)) => Ok(Some(request)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}
