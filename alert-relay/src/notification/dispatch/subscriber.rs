//! Fan-out to every subscription matching the notification labels.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{DispatchOutput, Dispatcher};
use crate::notification::log::NotificationLog;
use crate::notification::message::{Message, MessageOptions};
use crate::notification::model::Notification;
use crate::notifier::NotifierRegistry;
use crate::silence::{SilenceFilter, SilenceService, SilenceType};
use crate::subscription::{Subscription, SubscriptionService};
use crate::telemetry::Telemetry;
use crate::{Error, Result};

pub struct SubscriberDispatcher {
    subscriptions: Arc<dyn SubscriptionService>,
    silences: Arc<dyn SilenceService>,
    notifiers: NotifierRegistry,
    telemetry: Arc<dyn Telemetry>,
}

impl SubscriberDispatcher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionService>,
        silences: Arc<dyn SilenceService>,
        notifiers: NotifierRegistry,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            subscriptions,
            silences,
            notifiers,
            telemetry,
        }
    }

    fn log_entry(notification: &Notification, subscription: &Subscription) -> NotificationLog {
        NotificationLog {
            namespace_id: notification.namespace_id,
            notification_id: notification.id.clone(),
            subscription_id: subscription.id,
            alert_ids: notification.alert_ids.clone(),
            ..Default::default()
        }
    }

    async fn prepare_subscription(
        &self,
        notification: &Notification,
        subscription: &Subscription,
        output: &mut DispatchOutput,
    ) -> Result<()> {
        let matchers = self
            .silences
            .list(&SilenceFilter {
                namespace_id: Some(notification.namespace_id),
                silence_type: Some(SilenceType::Matchers),
                subscription_match: Some(subscription.match_labels.clone()),
                ..Default::default()
            })
            .await?;

        if !matchers.is_empty() {
            debug!(
                subscription_id = subscription.id,
                silences = matchers.len(),
                "Subscription silenced by matchers"
            );
            output.has_silenced = true;
            output.logs.push(NotificationLog {
                silence_ids: matchers.into_iter().map(|s| s.id).collect(),
                ..Self::log_entry(notification, subscription)
            });
            return Ok(());
        }

        let rule_silences = self
            .silences
            .list(&SilenceFilter {
                namespace_id: Some(notification.namespace_id),
                silence_type: Some(SilenceType::Subscription),
                subscription_id: Some(subscription.id),
                ..Default::default()
            })
            .await?;

        let (silenced, valid) = subscription.silence_receivers(&rule_silences)?;
        for (receiver_id, silences) in silenced {
            output.has_silenced = true;
            output.logs.push(NotificationLog {
                receiver_id,
                silence_ids: silences.into_iter().map(|s| s.id).collect(),
                ..Self::log_entry(notification, subscription)
            });
        }

        for receiver in valid {
            let notifier = self.notifiers.get(&receiver.receiver_type)?;
            let message = Message::initialize(
                notifier.as_ref(),
                notification,
                &receiver.receiver_type,
                &receiver.configuration,
                MessageOptions::with_expiry(notification.valid_duration),
            )
            .await?;

            output.messages.push(message);
            output.logs.push(NotificationLog {
                receiver_id: receiver.id,
                ..Self::log_entry(notification, subscription)
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Dispatcher for SubscriberDispatcher {
    async fn prepare_message(&self, notification: &Notification) -> Result<DispatchOutput> {
        let subscriptions = self
            .subscriptions
            .match_by_labels(notification.namespace_id, &notification.labels)
            .await?;

        if subscriptions.is_empty() {
            self.telemetry
                .subscriber_not_found(notification.namespace_id);
            return Err(Error::invalid("not matching any subscription"));
        }

        let mut output = DispatchOutput::default();
        for subscription in subscriptions
            .iter()
            .filter(|s| !s.receivers.is_empty())
        {
            self.prepare_subscription(notification, subscription, &mut output)
                .await?;
        }

        Ok(output)
    }
}
