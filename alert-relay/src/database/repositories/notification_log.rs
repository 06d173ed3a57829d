//! Notification log repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::NotificationLogDbModel;
use crate::notification::log::{LogService, NotificationLog};
use crate::{Error, Result};

pub struct SqlxNotificationLogRepository {
    pool: SqlitePool,
}

impl SqlxNotificationLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_by_notification(&self, notification_id: &str) -> Result<Vec<NotificationLog>> {
        let rows = sqlx::query_as::<_, NotificationLogDbModel>(
            "SELECT * FROM notification_log WHERE notification_id = ? ORDER BY created_at, id",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationLogDbModel::into_log).collect()
    }

    async fn list_by_silence_id(&self, silence_id: &str) -> Result<Vec<NotificationLog>> {
        let rows = sqlx::query_as::<_, NotificationLogDbModel>(
            r#"
            SELECT * FROM notification_log
            WHERE EXISTS (SELECT 1 FROM json_each(notification_log.silence_ids) WHERE value = ?)
            ORDER BY created_at, id
            "#,
        )
        .bind(silence_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationLogDbModel::into_log).collect()
    }

    /// Distinct alert ids suppressed by a silence.
    pub async fn list_alert_ids_by_silence_id(&self, silence_id: &str) -> Result<Vec<i64>> {
        let ids: BTreeSet<i64> = self
            .list_by_silence_id(silence_id)
            .await?
            .into_iter()
            .flat_map(|log| log.alert_ids)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Distinct subscriptions a silence has suppressed deliveries for.
    pub async fn list_subscription_ids_by_silence_id(&self, silence_id: &str) -> Result<Vec<u64>> {
        let ids: BTreeSet<u64> = self
            .list_by_silence_id(silence_id)
            .await?
            .into_iter()
            .map(|log| log.subscription_id)
            .filter(|id| *id != 0)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl LogService for SqlxNotificationLogRepository {
    async fn log_notifications(&self, logs: &[NotificationLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let now: DateTime<Utc> = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for log in logs {
            let mut model = NotificationLogDbModel::from_log(log)?;
            if model.id.is_empty() {
                model.id = uuid::Uuid::new_v4().to_string();
            }
            if model.created_at <= 0 {
                model.created_at = now.timestamp_millis();
            }

            let result = sqlx::query(
                r#"
                INSERT INTO notification_log
                    (id, namespace_id, notification_id, subscription_id, receiver_id, alert_ids, silence_ids, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&model.id)
            .bind(model.namespace_id)
            .bind(&model.notification_id)
            .bind(model.subscription_id)
            .bind(model.receiver_id)
            .bind(&model.alert_ids)
            .bind(&model.silence_ids)
            .bind(model.created_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        if inserted != logs.len() as u64 {
            return Err(Error::Database(format!(
                "inserted {inserted} of {} notification logs",
                logs.len()
            )));
        }
        tx.commit().await?;
        Ok(())
    }
}
