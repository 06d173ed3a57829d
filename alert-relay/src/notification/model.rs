//! The notification entity.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const RECEIVER_ID_LABEL_KEY: &str = "receiver_id";
pub const VALID_DURATION_REQUEST_KEY: &str = "valid_duration";

pub const TYPE_RECEIVER: &str = "receiver";
pub const TYPE_SUBSCRIBER: &str = "subscriber";

/// A logical alerting event to be routed.
///
/// `receiver` notifications carry a numeric `receiver_id` label and go to that
/// receiver only. `subscriber` notifications are routed by label match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub id: String,
    pub namespace_id: u64,
    pub notification_type: String,
    pub data: Map<String, Value>,
    pub labels: BTreeMap<String, String>,
    /// Zero means the resulting messages never expire.
    pub valid_duration: Duration,
    pub template: String,
    pub unique_key: String,
    pub created_at: DateTime<Utc>,
    /// Not persisted with the notification; carried into the delivery log.
    pub alert_ids: Vec<i64>,
}

impl Notification {
    pub fn validate(&self) -> Result<()> {
        match self.notification_type.as_str() {
            TYPE_RECEIVER => {
                let valid = self
                    .labels
                    .get(RECEIVER_ID_LABEL_KEY)
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .is_some_and(|id| id != 0);
                if valid {
                    Ok(())
                } else {
                    Err(Error::invalid(format!(
                        "notification type receiver should have valid receiver_id: {:?}",
                        self.labels
                    )))
                }
            }
            TYPE_SUBSCRIBER => {
                if self.labels.is_empty() {
                    Err(Error::invalid(
                        "notification type subscriber should have labels",
                    ))
                } else {
                    Ok(())
                }
            }
            other => Err(Error::invalid(format!(
                "invalid notification type: {other:?}"
            ))),
        }
    }

    /// Adopt the persisted id, also exposing it to templates as `data.id`.
    pub fn enrich_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.data.insert("id".to_string(), Value::String(id.clone()));
        self.id = id;
    }

    pub fn receiver_id(&self) -> Result<u64> {
        let raw = self
            .labels
            .get(RECEIVER_ID_LABEL_KEY)
            .ok_or_else(|| Error::invalid("notification has no receiver_id label"))?;
        raw.trim().parse::<u64>().map_err(|e| {
            Error::invalid(format!("invalid receiver id {raw:?} in notification: {e}"))
        })
    }
}
