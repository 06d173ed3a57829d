//! Notification repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::NotificationDbModel;
use crate::notification::model::Notification;
use crate::{Error, Result};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Persist the notification and return its id.
    ///
    /// An empty id is replaced by a generated one.
    async fn create(&self, notification: &Notification) -> Result<String>;
    async fn get(&self, id: &str) -> Result<Notification>;
}

pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<String> {
        let mut model = NotificationDbModel::from_notification(notification)?;
        if model.id.is_empty() {
            model.id = uuid::Uuid::new_v4().to_string();
        }

        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, namespace_id, type, data, labels, valid_duration_ms, template, unique_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(model.namespace_id)
        .bind(&model.notification_type)
        .bind(&model.data)
        .bind(&model.labels)
        .bind(model.valid_duration_ms)
        .bind(&model.template)
        .bind(&model.unique_key)
        .bind(model.created_at)
        .execute(&self.pool)
        .await?;

        Ok(model.id)
    }

    async fn get(&self, id: &str) -> Result<Notification> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))?
            .into_notification()
    }
}
