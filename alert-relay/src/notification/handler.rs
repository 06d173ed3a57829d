//! Queue consumers: the message handler and the periodic cleanup job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::{Message, MessageStatus};
use crate::config::{CleanupConfig, HandlerConfig, parse_threshold};
use crate::database::repositories::IdempotencyRepository;
use crate::notifier::NotifierRegistry;
use crate::queue::{CleanupFilter, MessageBatchHandler, Queue};
use crate::telemetry::Telemetry;
use crate::worker::{Runnable, Ticker};
use crate::{Error, Result};

const HOOK_POST_QUEUE: &str = "post_hook_queue";

/// Polls a queue and publishes claimed messages through their notifier.
pub struct Handler {
    id: String,
    queue: Arc<dyn Queue>,
    notifiers: NotifierRegistry,
    telemetry: Arc<dyn Telemetry>,
    receiver_types: Vec<String>,
    batch_size: usize,
    poll_interval: Duration,
}

impl Handler {
    /// `receiver_types` from the config, or every registered type when empty.
    pub fn new(
        id: impl Into<String>,
        config: &HandlerConfig,
        queue: Arc<dyn Queue>,
        notifiers: NotifierRegistry,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let receiver_types = if config.receiver_types.is_empty() {
            notifiers.receiver_types()
        } else {
            config.receiver_types.clone()
        };

        Self {
            id: id.into(),
            queue,
            notifiers,
            telemetry,
            receiver_types,
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn receiver_types(&self) -> &[String] {
        &self.receiver_types
    }

    /// One poll: claim a batch and handle it. An empty queue is not an error.
    pub async fn process(&self, cancel: &CancellationToken) -> Result<()> {
        match self
            .queue
            .dequeue(cancel, &self.receiver_types, self.batch_size, self)
            .await
        {
            Err(Error::NoMessage) => {
                debug!(handler = %self.id, "No message to process");
                Ok(())
            }
            other => other,
        }
    }

    /// Publish each message in order, stopping at the first failure.
    pub async fn message_handler(
        &self,
        cancel: &CancellationToken,
        messages: Vec<Message>,
    ) -> Result<()> {
        for mut message in messages {
            let notifier = self.notifiers.get(&message.receiver_type)?;
            let receiver_type = message.receiver_type.clone();

            let now = Utc::now();
            let queued_ms = (now - message.created_at).num_milliseconds().max(0) as u64;
            self.telemetry
                .message_queue_time(&receiver_type, queued_ms);

            message.mark_pending(now);
            self.telemetry
                .message_status(&receiver_type, MessageStatus::Pending);

            let configs = match notifier
                .post_hook_queue_transform_configs(message.configs.clone())
                .await
            {
                Ok(configs) => configs,
                Err(err) => {
                    self.telemetry.hook_failed(&receiver_type, HOOK_POST_QUEUE);
                    return self.fail(message, false, err).await;
                }
            };

            // transformed configs are only used for the outgoing call
            let mut outgoing = message.clone();
            outgoing.configs = configs;

            match notifier.publish(cancel, &outgoing).await {
                Ok(()) => {
                    message.mark_published(Utc::now());
                    self.telemetry
                        .message_status(&receiver_type, MessageStatus::Published);
                    self.queue.success_callback(&message).await?;
                    debug!(id = %message.id, receiver_type = %receiver_type, "Message published");
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    return self.fail(message, retryable, err).await;
                }
            }
        }
        Ok(())
    }

    async fn fail(&self, mut message: Message, retryable: bool, err: Error) -> Result<()> {
        message.mark_failed(Utc::now(), retryable, &err);
        self.telemetry
            .message_status(&message.receiver_type, MessageStatus::Failed);
        warn!(
            handler = %self.id,
            id = %message.id,
            receiver_type = %message.receiver_type,
            retryable = retryable,
            try_count = message.try_count,
            error = %err,
            "Message delivery failed"
        );
        self.queue.error_callback(&message).await?;
        Err(err)
    }
}

#[async_trait]
impl MessageBatchHandler for Handler {
    async fn handle(&self, cancel: &CancellationToken, messages: Vec<Message>) -> Result<()> {
        self.message_handler(cancel, messages).await
    }
}

#[async_trait]
impl Runnable for Handler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            handler = %self.id,
            queue = self.queue.queue_type(),
            receiver_types = ?self.receiver_types,
            batch_size = self.batch_size,
            "Message handler started"
        );
        Ticker::new(self.id.clone(), self.poll_interval)
            .run(&cancel, || self.process(&cancel))
            .await;
        Ok(())
    }
}

/// Periodic queue cleanup and idempotency key expiry.
pub struct CleanupJob {
    queue: Arc<dyn Queue>,
    idempotencies: Option<Arc<dyn IdempotencyRepository>>,
    filter: CleanupFilter,
    idempotency_ttl: Option<Duration>,
    interval: Duration,
}

impl CleanupJob {
    pub fn new(
        config: &CleanupConfig,
        queue: Arc<dyn Queue>,
        idempotencies: Option<Arc<dyn IdempotencyRepository>>,
    ) -> Result<Self> {
        let filter = CleanupFilter {
            message_published_time_threshold: config.message_published_time_threshold.clone(),
            message_pending_time_threshold: config.message_pending_time_threshold.clone(),
        };
        // fail at startup rather than on every tick
        filter.published_threshold()?;
        filter.pending_threshold()?;

        Ok(Self {
            queue,
            idempotencies,
            filter,
            idempotency_ttl: parse_threshold(&config.idempotency_ttl)?,
            interval: config.interval(),
        })
    }

    pub async fn run_once(&self) -> Result<()> {
        match self.queue.cleanup(&self.filter).await {
            Ok(()) | Err(Error::NoMessage) => {}
            Err(e) => return Err(e),
        }

        if let (Some(repository), Some(ttl)) = (&self.idempotencies, self.idempotency_ttl) {
            let removed = repository.delete_older_than(ttl).await?;
            if removed > 0 {
                info!(removed = removed, "Removed expired idempotency keys");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Runnable for CleanupJob {
    fn id(&self) -> &str {
        "cleanup"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        Ticker::new("cleanup", self.interval)
            .run(&cancel, || self.run_once())
            .await;
        Ok(())
    }
}
