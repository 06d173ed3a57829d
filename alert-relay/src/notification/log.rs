//! Delivery audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// What was delivered or suppressed for one notification.
///
/// `subscription_id` is zero for direct receiver notifications and
/// `receiver_id` is zero when a whole subscription was silenced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationLog {
    /// Assigned on insert when empty.
    pub id: String,
    pub namespace_id: u64,
    pub notification_id: String,
    pub subscription_id: u64,
    pub receiver_id: u64,
    pub alert_ids: Vec<i64>,
    pub silence_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationLog {
    pub fn is_silenced(&self) -> bool {
        !self.silence_ids.is_empty()
    }
}

#[async_trait]
pub trait LogService: Send + Sync {
    async fn log_notifications(&self, logs: &[NotificationLog]) -> Result<()>;
}
