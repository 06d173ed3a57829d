//! Channel-backed queue for development and tests.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CleanupFilter, MessageBatchHandler, Queue};
use crate::notification::message::Message;
use crate::{Error, Result};

pub const QUEUE_TYPE_MEMORY: &str = "memory";

/// Bounded in-process queue.
///
/// Nothing survives a restart and receiver types are not filtered.
pub struct MemoryQueue {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn queue_type(&self) -> &'static str {
        QUEUE_TYPE_MEMORY
    }

    async fn enqueue(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Err(Error::Database("no messages to enqueue".to_string()));
        }
        for message in messages {
            self.tx
                .try_send(message)
                .map_err(|e| Error::Other(format!("failed to enqueue message: {e}")))?;
        }
        Ok(())
    }

    async fn dequeue(
        &self,
        cancel: &CancellationToken,
        _receiver_types: &[String],
        batch_size: usize,
        handler: &dyn MessageBatchHandler,
    ) -> Result<()> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            rx = self.rx.lock() => rx,
        };

        let first = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = rx.recv() => message,
        };
        let Some(first) = first else {
            return Err(Error::NoMessage);
        };

        let mut batch = vec![first];
        while batch.len() < batch_size.max(1) {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        drop(rx);

        let now = Utc::now();
        for message in &mut batch {
            message.mark_pending(now);
        }
        debug!(count = batch.len(), "Dequeued messages from memory queue");

        handler.handle(cancel, batch).await
    }

    async fn success_callback(&self, message: &Message) -> Result<()> {
        debug!(id = %message.id, "Message published");
        Ok(())
    }

    async fn error_callback(&self, message: &Message) -> Result<()> {
        debug!(id = %message.id, error = %message.last_error, "Message failed");
        Ok(())
    }

    async fn cleanup(&self, _filter: &CleanupFilter) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.rx.lock().await.close();
        info!("Memory queue stopped");
        Ok(())
    }
}
