//! Notification and notification log rows.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::notification::log::NotificationLog;
use crate::notification::model::Notification;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    /// NULL when the notification has no namespace.
    pub namespace_id: Option<i64>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub notification_type: String,
    /// JSON object
    pub data: String,
    /// JSON object of string values
    pub labels: String,
    pub valid_duration_ms: i64,
    pub template: Option<String>,
    pub unique_key: String,
    pub created_at: i64,
}

impl NotificationDbModel {
    pub fn from_notification(n: &Notification) -> Result<Self> {
        Ok(Self {
            id: n.id.clone(),
            namespace_id: (n.namespace_id != 0).then_some(n.namespace_id as i64),
            notification_type: n.notification_type.clone(),
            data: serde_json::to_string(&n.data)?,
            labels: serde_json::to_string(&n.labels)?,
            valid_duration_ms: i64::try_from(n.valid_duration.as_millis()).unwrap_or(i64::MAX),
            template: (!n.template.is_empty()).then(|| n.template.clone()),
            unique_key: n.unique_key.clone(),
            created_at: datetime_to_ms(n.created_at),
        })
    }

    pub fn into_notification(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            namespace_id: self.namespace_id.unwrap_or(0) as u64,
            notification_type: self.notification_type,
            data: serde_json::from_str(&self.data)?,
            labels: serde_json::from_str(&self.labels)?,
            valid_duration: Duration::from_millis(self.valid_duration_ms.max(0) as u64),
            template: self.template.unwrap_or_default(),
            unique_key: self.unique_key,
            created_at: ms_to_datetime(self.created_at),
            alert_ids: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLogDbModel {
    pub id: String,
    pub namespace_id: i64,
    pub notification_id: String,
    pub subscription_id: i64,
    pub receiver_id: i64,
    /// JSON array of alert ids
    pub alert_ids: String,
    /// JSON array of silence ids
    pub silence_ids: String,
    pub created_at: i64,
}

impl NotificationLogDbModel {
    pub fn from_log(log: &NotificationLog) -> Result<Self> {
        Ok(Self {
            id: log.id.clone(),
            namespace_id: log.namespace_id as i64,
            notification_id: log.notification_id.clone(),
            subscription_id: log.subscription_id as i64,
            receiver_id: log.receiver_id as i64,
            alert_ids: serde_json::to_string(&log.alert_ids)?,
            silence_ids: serde_json::to_string(&log.silence_ids)?,
            created_at: datetime_to_ms(log.created_at),
        })
    }

    pub fn into_log(self) -> Result<NotificationLog> {
        Ok(NotificationLog {
            id: self.id,
            namespace_id: self.namespace_id as u64,
            notification_id: self.notification_id,
            subscription_id: self.subscription_id as u64,
            receiver_id: self.receiver_id as u64,
            alert_ids: serde_json::from_str(&self.alert_ids)?,
            silence_ids: serde_json::from_str(&self.silence_ids)?,
            created_at: ms_to_datetime(self.created_at),
        })
    }
}
