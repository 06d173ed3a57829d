//! Messages: channel-bound delivery units and their lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, IntoStaticStr};

use super::model::Notification;
use crate::notifier::Notifier;
use crate::{Error, Result};

pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Detail key carrying the notification type (`receiver` / `subscriber`).
pub const DETAILS_KEY_NOTIFICATION_TYPE: &str = "notification_type";

/// Message status.
///
/// `enqueued -> pending -> published | failed`; a retryable `failed` message
/// goes back to `pending` when the dead-letter handler claims it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    Enqueued,
    Pending,
    Published,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub status: MessageStatus,
    pub receiver_type: String,
    /// Source for the channel-specific delivery configuration.
    pub configs: Map<String, Value>,
    /// Source for the channel-specific payload.
    pub details: Map<String, Value>,
    pub last_error: String,
    pub max_tries: u32,
    pub try_count: u32,
    pub retryable: bool,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional settings for [`Message::initialize`].
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub max_tries: Option<u32>,
    /// Zero means no expiry.
    pub expiry: Duration,
}

impl MessageOptions {
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry,
            ..Default::default()
        }
    }
}

impl Message {
    /// Create an `enqueued` message for one receiver of a notification.
    ///
    /// Configs pass through the notifier's pre-hook. Details are the
    /// notification labels overlaid with its data, plus the notification type.
    pub async fn initialize(
        notifier: &dyn Notifier,
        notification: &Notification,
        receiver_type: &str,
        configs: &Map<String, Value>,
        opts: MessageOptions,
    ) -> Result<Self> {
        let max_tries = opts.max_tries.unwrap_or(DEFAULT_MAX_TRIES);
        if max_tries == 0 {
            return Err(Error::invalid("max tries must be at least 1"));
        }

        let configs = notifier
            .pre_hook_queue_transform_configs(configs.clone())
            .await?;

        let mut details: Map<String, Value> = notification
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        for (key, value) in &notification.data {
            details.insert(key.clone(), value.clone());
        }
        details.insert(
            DETAILS_KEY_NOTIFICATION_TYPE.to_string(),
            Value::String(notification.notification_type.clone()),
        );

        let now = opts.created_at.unwrap_or_else(Utc::now);
        let expired_at = if opts.expiry.is_zero() {
            None
        } else {
            chrono::Duration::from_std(opts.expiry)
                .ok()
                .and_then(|expiry| now.checked_add_signed(expiry))
        };

        Ok(Self {
            id: opts.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            status: MessageStatus::Enqueued,
            receiver_type: receiver_type.to_string(),
            configs,
            details,
            last_error: String::new(),
            max_tries,
            try_count: 0,
            retryable: false,
            expired_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Claimed by a worker. Does not count as a try.
    pub fn mark_pending(&mut self, now: DateTime<Utc>) {
        self.status = MessageStatus::Pending;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, retryable: bool, err: &dyn std::fmt::Display) {
        self.try_count = (self.try_count + 1).min(self.max_tries);
        self.last_error = err.to_string();
        self.retryable = retryable;
        self.status = MessageStatus::Failed;
        self.updated_at = now;
    }

    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        self.try_count = (self.try_count + 1).min(self.max_tries);
        self.status = MessageStatus::Published;
        self.updated_at = now;
    }

    /// Whether no further delivery attempt will be made.
    pub fn is_exhausted(&self) -> bool {
        self.try_count >= self.max_tries
    }
}
