//! Durable queue on the `message_queue` table.
//!
//! Claiming is a single `UPDATE ... WHERE id IN (SELECT ...) RETURNING *`.
//! SQLite serializes writers, so the eligibility check and the flip to
//! `pending` happen under one write lock and concurrent claimants, in this
//! process or another, never receive the same row.

use std::time::Duration;

use async_trait::async_trait;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CleanupFilter, MessageBatchHandler, Queue};
use crate::database::models::MessageDbModel;
use crate::database::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::database::DbPool;
use crate::notification::message::{Message, MessageStatus};
use crate::{Error, Result};

pub const QUEUE_TYPE_SQLITE: &str = "sqlite";

/// Which rows a queue instance claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Strategy {
    /// Freshly enqueued messages.
    #[default]
    Default,
    /// Failed messages that may be attempted again.
    Dlq,
}

impl Strategy {
    fn eligibility_clause(&self) -> &'static str {
        match self {
            Self::Default => "status = 'enqueued'",
            Self::Dlq => "status = 'failed' AND retryable = 1",
        }
    }
}

pub struct SqliteQueue {
    pool: DbPool,
    strategy: Strategy,
}

impl SqliteQueue {
    pub fn new(pool: DbPool, strategy: Strategy) -> Self {
        Self { pool, strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn claim_sql(&self, receiver_types: usize) -> String {
        let type_filter = if receiver_types == 0 {
            String::new()
        } else {
            format!(
                " AND receiver_type IN ({})",
                vec!["?"; receiver_types].join(", ")
            )
        };

        format!(
            r#"
            UPDATE message_queue SET status = 'pending', updated_at = ?
            WHERE id IN (
                SELECT id FROM message_queue
                WHERE {} AND try_count < max_tries
                  AND (expired_at IS NULL OR expired_at < ?){}
                ORDER BY expired_at
                LIMIT ?
            )
            RETURNING *
            "#,
            self.strategy.eligibility_clause(),
            type_filter
        )
    }

    async fn claim(&self, receiver_types: &[String], batch_size: usize) -> Result<Vec<Message>> {
        let sql = self.claim_sql(receiver_types.len());
        let limit = i64::try_from(batch_size.max(1)).unwrap_or(i64::MAX);

        let rows = retry_on_sqlite_busy("claim_messages", || async {
            let now = now_ms();
            let mut query = sqlx::query_as::<_, MessageDbModel>(&sql).bind(now).bind(now);
            for receiver_type in receiver_types {
                query = query.bind(receiver_type);
            }
            Ok(query.bind(limit).fetch_all(&self.pool).await?)
        })
        .await?;

        let mut messages = rows
            .into_iter()
            .map(MessageDbModel::into_message)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the sub-select order.
        messages.sort_by_key(|m| m.expired_at);
        Ok(messages)
    }

    async fn insert_all(&self, models: &[MessageDbModel]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for model in models {
            let result = sqlx::query(
                r#"
                INSERT INTO message_queue
                    (id, status, receiver_type, configs, details, last_error, max_tries,
                     try_count, retryable, expired_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&model.id)
            .bind(&model.status)
            .bind(&model.receiver_type)
            .bind(&model.configs)
            .bind(&model.details)
            .bind(&model.last_error)
            .bind(model.max_tries)
            .bind(model.try_count)
            .bind(model.retryable)
            .bind(model.expired_at)
            .bind(model.created_at)
            .bind(model.updated_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_outcome(&self, message: &Message, status: MessageStatus) -> Result<()> {
        let rows = retry_on_sqlite_busy("update_message_outcome", || async {
            let result = sqlx::query(
                r#"
                UPDATE message_queue
                SET status = ?, try_count = ?, last_error = ?, retryable = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(<&'static str>::from(status))
            .bind(i64::from(message.try_count))
            .bind(&message.last_error)
            .bind(message.retryable)
            .bind(message.updated_at.timestamp_millis())
            .bind(&message.id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(Error::Database(format!(
                "cannot update message {} to {status}: no rows affected",
                message.id
            )));
        }
        Ok(())
    }

    async fn cleanup_rows(&self, published: Duration, pending: Option<Duration>) -> Result<u64> {
        let now = now_ms();
        let cutoff = |age: Duration| now.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX));

        let mut tx = self.pool.begin().await?;
        let mut affected = sqlx::query(
            r#"
            DELETE FROM message_queue
            WHERE updated_at < ?
              AND (status = 'published'
                   OR (status = 'failed' AND (retryable = 0 OR try_count >= max_tries)))
            "#,
        )
        .bind(cutoff(published))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if let Some(pending) = pending {
            let pending_cutoff = cutoff(pending);
            affected += sqlx::query(
                "DELETE FROM message_queue WHERE status = 'pending' AND updated_at < ? AND try_count >= max_tries",
            )
            .bind(pending_cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            affected += sqlx::query(
                r#"
                UPDATE message_queue SET status = 'enqueued', updated_at = ?
                WHERE status = 'pending' AND updated_at < ? AND try_count < max_tries
                "#,
            )
            .bind(now)
            .bind(pending_cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    fn queue_type(&self) -> &'static str {
        QUEUE_TYPE_SQLITE
    }

    async fn enqueue(&self, messages: Vec<Message>) -> Result<()> {
        let models = messages
            .iter()
            .map(MessageDbModel::from_message)
            .collect::<Result<Vec<_>>>()?;

        let inserted = retry_on_sqlite_busy("enqueue_messages", || self.insert_all(&models)).await?;
        if inserted == 0 {
            return Err(Error::Database("no messages enqueued".to_string()));
        }

        debug!(count = inserted, "Enqueued messages");
        Ok(())
    }

    async fn dequeue(
        &self,
        cancel: &CancellationToken,
        receiver_types: &[String],
        batch_size: usize,
        handler: &dyn MessageBatchHandler,
    ) -> Result<()> {
        let messages = self.claim(receiver_types, batch_size).await?;
        if messages.is_empty() {
            return Err(Error::NoMessage);
        }

        debug!(
            strategy = %self.strategy,
            count = messages.len(),
            "Claimed messages"
        );
        handler.handle(cancel, messages).await
    }

    async fn success_callback(&self, message: &Message) -> Result<()> {
        self.update_outcome(message, MessageStatus::Published).await
    }

    async fn error_callback(&self, message: &Message) -> Result<()> {
        self.update_outcome(message, MessageStatus::Failed).await
    }

    /// Delete aged terminal rows and recover stuck `pending` rows.
    ///
    /// Stuck rows with tries left go back to `enqueued`; exhausted ones are
    /// deleted. Touching no row at all yields [`Error::NoMessage`].
    async fn cleanup(&self, filter: &CleanupFilter) -> Result<()> {
        let published = filter.published_threshold()?;
        let pending = filter.pending_threshold()?;

        let affected =
            retry_on_sqlite_busy("cleanup_messages", || self.cleanup_rows(published, pending))
                .await?;
        if affected == 0 {
            return Err(Error::NoMessage);
        }

        info!(affected = affected, "Cleaned up message queue");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.pool.close().await;
        info!(strategy = %self.strategy, "SQLite queue stopped");
        Ok(())
    }
}
