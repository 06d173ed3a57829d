//! Message queue row.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, opt_datetime_to_ms};
use crate::notification::message::{Message, MessageStatus};
use crate::{Error, Result};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageDbModel {
    pub id: String,
    /// enqueued, pending, published, failed
    pub status: String,
    pub receiver_type: String,
    /// JSON object
    pub configs: String,
    /// JSON object
    pub details: String,
    pub last_error: String,
    pub max_tries: i64,
    pub try_count: i64,
    pub retryable: bool,
    pub expired_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MessageDbModel {
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            id: message.id.clone(),
            status: message.status.to_string(),
            receiver_type: message.receiver_type.clone(),
            configs: serde_json::to_string(&message.configs)?,
            details: serde_json::to_string(&message.details)?,
            last_error: message.last_error.clone(),
            max_tries: i64::from(message.max_tries),
            try_count: i64::from(message.try_count),
            retryable: message.retryable,
            expired_at: opt_datetime_to_ms(message.expired_at),
            created_at: datetime_to_ms(message.created_at),
            updated_at: datetime_to_ms(message.updated_at),
        })
    }

    pub fn into_message(self) -> Result<Message> {
        let status = MessageStatus::from_str(&self.status).map_err(|_| {
            Error::Database(format!(
                "message {} has unknown status {:?}",
                self.id, self.status
            ))
        })?;

        Ok(Message {
            status,
            receiver_type: self.receiver_type,
            configs: serde_json::from_str(&self.configs)?,
            details: serde_json::from_str(&self.details)?,
            last_error: self.last_error,
            max_tries: u32::try_from(self.max_tries).unwrap_or(0),
            try_count: u32::try_from(self.try_count).unwrap_or(0),
            retryable: self.retryable,
            expired_at: self.expired_at.map(ms_to_datetime),
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
            id: self.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_message_model_conversion() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let message = Message {
            id: "m1".to_string(),
            status: MessageStatus::Failed,
            receiver_type: "http".to_string(),
            configs: json!({"url": "http://x"}).as_object().cloned().unwrap(),
            details: json!({"n": 1}).as_object().cloned().unwrap(),
            last_error: "503".to_string(),
            max_tries: 3,
            try_count: 1,
            retryable: true,
            expired_at: None,
            created_at: now,
            updated_at: now,
        };

        let model = MessageDbModel::from_message(&message).unwrap();
        assert_eq!(model.status, "failed");
        assert_eq!(model.configs, r#"{"url":"http://x"}"#);
        assert_eq!(model.created_at, 1_700_000_000_123);
        assert_eq!(model.into_message().unwrap(), message);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let model = MessageDbModel {
            id: "m1".to_string(),
            status: "lost".to_string(),
            receiver_type: "http".to_string(),
            configs: "{}".to_string(),
            details: "{}".to_string(),
            last_error: String::new(),
            max_tries: 3,
            try_count: 0,
            retryable: false,
            expired_at: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(model.into_message().is_err());
    }
}
