//! Message queue abstraction.
//!
//! A queue owns enqueued messages until a handler claims them. Claimed
//! messages are handed to a [`MessageBatchHandler`] already marked
//! `pending`; the handler reports each outcome back through
//! [`Queue::success_callback`] or [`Queue::error_callback`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::{SqliteQueue, Strategy};

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::parse_threshold;
use crate::notification::message::Message;

/// Published rows older than this are removed when no threshold is configured.
pub const DEFAULT_PUBLISHED_TIME_THRESHOLD: Duration = Duration::from_secs(7 * 60 * 60);

/// Consumer of a claimed batch.
#[async_trait]
pub trait MessageBatchHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, messages: Vec<Message>) -> Result<()>;
}

/// Age thresholds for [`Queue::cleanup`], as humantime strings.
#[derive(Debug, Clone, Default)]
pub struct CleanupFilter {
    /// Empty means [`DEFAULT_PUBLISHED_TIME_THRESHOLD`].
    pub message_published_time_threshold: String,
    /// Empty disables stuck-pending recovery.
    pub message_pending_time_threshold: String,
}

impl CleanupFilter {
    pub fn published_threshold(&self) -> Result<Duration> {
        Ok(parse_threshold(&self.message_published_time_threshold)?
            .unwrap_or(DEFAULT_PUBLISHED_TIME_THRESHOLD))
    }

    pub fn pending_threshold(&self) -> Result<Option<Duration>> {
        parse_threshold(&self.message_pending_time_threshold)
    }
}

#[async_trait]
pub trait Queue: Send + Sync {
    fn queue_type(&self) -> &'static str;

    /// Persist all messages. Persisting none of them is an error.
    async fn enqueue(&self, messages: Vec<Message>) -> Result<()>;

    /// Claim up to `batch_size` eligible messages and pass them to `handler`.
    ///
    /// Returns [`crate::Error::NoMessage`] when nothing was eligible.
    async fn dequeue(
        &self,
        cancel: &CancellationToken,
        receiver_types: &[String],
        batch_size: usize,
        handler: &dyn MessageBatchHandler,
    ) -> Result<()>;

    async fn success_callback(&self, message: &Message) -> Result<()>;

    async fn error_callback(&self, message: &Message) -> Result<()>;

    async fn cleanup(&self, filter: &CleanupFilter) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_filter_thresholds() {
        let filter = CleanupFilter::default();
        assert_eq!(
            filter.published_threshold().unwrap(),
            DEFAULT_PUBLISHED_TIME_THRESHOLD
        );
        assert_eq!(filter.pending_threshold().unwrap(), None);

        let filter = CleanupFilter {
            message_published_time_threshold: "30m".to_string(),
            message_pending_time_threshold: "1h 30m".to_string(),
        };
        assert_eq!(
            filter.published_threshold().unwrap(),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            filter.pending_threshold().unwrap(),
            Some(Duration::from_secs(90 * 60))
        );

        let filter = CleanupFilter {
            message_published_time_threshold: "soon".to_string(),
            ..Default::default()
        };
        assert!(filter.published_threshold().is_err());
    }
}
