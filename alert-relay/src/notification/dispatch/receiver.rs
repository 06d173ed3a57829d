//! Direct delivery to the receiver named by the `receiver_id` label.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DispatchOutput, Dispatcher};
use crate::Result;
use crate::notification::log::NotificationLog;
use crate::notification::message::{Message, MessageOptions};
use crate::notification::model::Notification;
use crate::notifier::NotifierRegistry;
use crate::receiver::ReceiverService;

pub struct ReceiverDispatcher {
    receivers: Arc<dyn ReceiverService>,
    notifiers: NotifierRegistry,
}

impl ReceiverDispatcher {
    pub fn new(receivers: Arc<dyn ReceiverService>, notifiers: NotifierRegistry) -> Self {
        Self {
            receivers,
            notifiers,
        }
    }
}

#[async_trait]
impl Dispatcher for ReceiverDispatcher {
    async fn prepare_message(&self, notification: &Notification) -> Result<DispatchOutput> {
        let receiver_id = notification.receiver_id()?;
        let receiver = self.receivers.get(receiver_id).await?;
        let notifier = self.notifiers.get(&receiver.receiver_type)?;

        let message = Message::initialize(
            notifier.as_ref(),
            notification,
            &receiver.receiver_type,
            &receiver.configurations,
            MessageOptions::with_expiry(notification.valid_duration),
        )
        .await?;

        let log = NotificationLog {
            namespace_id: notification.namespace_id,
            notification_id: notification.id.clone(),
            receiver_id,
            alert_ids: notification.alert_ids.clone(),
            ..Default::default()
        };

        Ok(DispatchOutput {
            messages: vec![message],
            logs: vec![log],
            has_silenced: false,
        })
    }
}
