//! Routing a notification to channel-bound messages.

pub mod receiver;
pub mod subscriber;

pub use receiver::ReceiverDispatcher;
pub use subscriber::SubscriberDispatcher;

use async_trait::async_trait;

use crate::Result;
use crate::notification::log::NotificationLog;
use crate::notification::message::Message;
use crate::notification::model::Notification;

/// Messages to enqueue plus the audit entries for one notification.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutput {
    pub messages: Vec<Message>,
    pub logs: Vec<NotificationLog>,
    /// At least one target was suppressed by a silence.
    pub has_silenced: bool,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn prepare_message(&self, notification: &Notification) -> Result<DispatchOutput>;
}
