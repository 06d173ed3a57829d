//! Idempotency key repository.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::IdempotencyDbModel;
use crate::database::time::now_ms;
use crate::notification::idempotency::Idempotency;
use crate::{Error, Result};

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Insert `(scope, key)`, or return the row already stored for the pair.
    async fn create(&self, scope: &str, key: &str) -> Result<Idempotency>;
    async fn get(&self, scope: &str, key: &str) -> Result<Idempotency>;
    async fn set_notification_id(&self, id: &str, notification_id: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Delete keys created more than `ttl` ago, returning how many were removed.
    async fn delete_older_than(&self, ttl: Duration) -> Result<u64>;
}

pub struct SqlxIdempotencyRepository {
    pool: SqlitePool,
}

impl SqlxIdempotencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for SqlxIdempotencyRepository {
    async fn create(&self, scope: &str, key: &str) -> Result<Idempotency> {
        // the no-op update makes RETURNING yield the existing row on conflict
        let model = sqlx::query_as::<_, IdempotencyDbModel>(
            r#"
            INSERT INTO idempotencies (id, scope, key, notification_id, created_at)
            VALUES (?, ?, ?, '', ?)
            ON CONFLICT (scope, key) DO UPDATE SET scope = excluded.scope
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(scope)
        .bind(key)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;

        Ok(model.into())
    }

    async fn get(&self, scope: &str, key: &str) -> Result<Idempotency> {
        sqlx::query_as::<_, IdempotencyDbModel>(
            "SELECT * FROM idempotencies WHERE scope = ? AND key = ?",
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .map(Idempotency::from)
        .ok_or_else(|| Error::not_found("Idempotency", format!("{scope}/{key}")))
    }

    async fn set_notification_id(&self, id: &str, notification_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE idempotencies SET notification_id = ? WHERE id = ?")
            .bind(notification_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Idempotency", id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotencies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_older_than(&self, ttl: Duration) -> Result<u64> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(ttl_ms);
        let result = sqlx::query("DELETE FROM idempotencies WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
