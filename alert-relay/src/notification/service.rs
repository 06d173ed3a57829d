//! Notification orchestration: persist, route, audit, enqueue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::builder;
use super::dispatch::Dispatcher;
use super::log::LogService;
use super::model::Notification;
use crate::alert::{Alert, AlertService};
use crate::database::repositories::{IdempotencyRepository, NotificationRepository};
use crate::queue::Queue;
use crate::{Error, Result};

pub struct NotificationService {
    repository: Arc<dyn NotificationRepository>,
    idempotencies: Arc<dyn IdempotencyRepository>,
    logs: Arc<dyn LogService>,
    alerts: Arc<dyn AlertService>,
    queue: Arc<dyn Queue>,
    dispatchers: HashMap<String, Arc<dyn Dispatcher>>,
    group_by: Vec<String>,
}

impl NotificationService {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        idempotencies: Arc<dyn IdempotencyRepository>,
        logs: Arc<dyn LogService>,
        alerts: Arc<dyn AlertService>,
        queue: Arc<dyn Queue>,
    ) -> Self {
        Self {
            repository,
            idempotencies,
            logs,
            alerts,
            queue,
            dispatchers: HashMap::new(),
            group_by: Vec::new(),
        }
    }

    /// Route notifications of `notification_type` through `dispatcher`.
    pub fn with_dispatcher(
        mut self,
        notification_type: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        self.dispatchers
            .insert(notification_type.into(), dispatcher);
        self
    }

    /// Label keys alerts are grouped by; empty groups by the full label set.
    pub fn with_group_by(mut self, group_by: Vec<String>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn build_from_alerts(
        &self,
        alerts: &[Alert],
        firing_len: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        builder::build_from_alerts(alerts, firing_len, &self.group_by, now)
    }

    /// Claim `(scope, key)`, returning the idempotency row id.
    ///
    /// A key whose dispatch already succeeded yields [`Error::Conflict`]. A key
    /// left unfinished by an earlier attempt is handed back for reuse.
    pub async fn check_and_insert_idempotency(&self, scope: &str, key: &str) -> Result<String> {
        let idempotency = self.idempotencies.create(scope, key).await?;
        if idempotency.is_completed() {
            return Err(Error::conflict(format!(
                "idempotency key {key:?} already exists in scope {scope:?}"
            )));
        }
        Ok(idempotency.id)
    }

    /// Persist and route one notification, returning its id.
    pub async fn dispatch(&self, mut notification: Notification) -> Result<String> {
        notification.validate()?;
        if notification.created_at.timestamp_millis() == 0 {
            notification.created_at = Utc::now();
        }

        let id = self.repository.create(&notification).await?;
        notification.enrich_id(id.clone());

        let dispatcher = self
            .dispatchers
            .get(&notification.notification_type)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "unsupported notification type: {:?}",
                    notification.notification_type
                ))
            })?;

        let output = dispatcher.prepare_message(&notification).await?;
        if output.messages.is_empty() && !output.has_silenced {
            return Err(Error::invalid("no messages produced"));
        }

        self.logs.log_notifications(&output.logs).await?;

        if !notification.alert_ids.is_empty() {
            self.alerts
                .update_silence_status(
                    &notification.alert_ids,
                    output.has_silenced,
                    !output.messages.is_empty(),
                )
                .await?;
        }

        let count = output.messages.len();
        if count > 0 {
            self.queue.enqueue(output.messages).await?;
        }

        info!(
            id = %id,
            notification_type = %notification.notification_type,
            messages = count,
            silenced = output.has_silenced,
            "Notification dispatched"
        );
        Ok(id)
    }

    /// Dispatch guarded by an idempotency key.
    ///
    /// On success the key records the notification id. On failure the key is
    /// released so the same submission can be retried.
    pub async fn dispatch_idempotent(
        &self,
        scope: &str,
        key: &str,
        notification: Notification,
    ) -> Result<String> {
        let idempotency_id = self.check_and_insert_idempotency(scope, key).await?;

        match self.dispatch(notification).await {
            Ok(notification_id) => {
                self.idempotencies
                    .set_notification_id(&idempotency_id, &notification_id)
                    .await?;
                Ok(notification_id)
            }
            Err(err) => {
                if let Err(release_err) = self.idempotencies.delete(&idempotency_id).await {
                    warn!(
                        scope = %scope,
                        key = %key,
                        error = %release_err,
                        "Failed to release idempotency key"
                    );
                }
                Err(err)
            }
        }
    }

    /// Drop idempotency keys older than `ttl`.
    pub async fn remove_idempotencies(&self, ttl: Duration) -> Result<u64> {
        let removed = self.idempotencies.delete_older_than(ttl).await?;
        debug!(removed = removed, "Removed expired idempotency keys");
        Ok(removed)
    }
}
