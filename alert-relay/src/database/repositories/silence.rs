//! Silence repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::SilenceDbModel;
use crate::database::time::now_ms;
use crate::silence::{Silence, SilenceFilter, SilenceService};
use crate::{Error, Result};

pub struct SqlxSilenceRepository {
    pool: SqlitePool,
}

impl SqlxSilenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validate and persist a silence, returning its id.
    pub async fn create(&self, silence: &Silence) -> Result<String> {
        silence.validate()?;

        let mut model = SilenceDbModel::from_silence(silence)?;
        if model.id.is_empty() {
            model.id = uuid::Uuid::new_v4().to_string();
        }
        if model.created_at <= 0 {
            model.created_at = now_ms();
        }

        sqlx::query(
            r#"
            INSERT INTO silences
                (id, namespace_id, type, target_id, target_expression, creator, comment, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&model.id)
        .bind(model.namespace_id)
        .bind(&model.silence_type)
        .bind(model.target_id)
        .bind(&model.target_expression)
        .bind(&model.creator)
        .bind(&model.comment)
        .bind(model.created_at)
        .execute(&self.pool)
        .await?;

        Ok(model.id)
    }

    pub async fn get(&self, id: &str) -> Result<Silence> {
        sqlx::query_as::<_, SilenceDbModel>(
            "SELECT * FROM silences WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Silence", id))?
        .into_silence()
    }

    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE silences SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Silence", id));
        }
        Ok(())
    }
}

#[async_trait]
impl SilenceService for SqlxSilenceRepository {
    async fn list(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        let rows = sqlx::query_as::<_, SilenceDbModel>(
            r#"
            SELECT * FROM silences
            WHERE deleted_at IS NULL
              AND (?1 IS NULL OR namespace_id = ?1)
              AND (?2 IS NULL OR type = ?2)
              AND (?3 IS NULL OR target_id = ?3)
            ORDER BY created_at, id
            "#,
        )
        .bind(filter.namespace_id.map(|id| id as i64))
        .bind(filter.silence_type.map(<&'static str>::from))
        .bind(filter.subscription_id.map(|id| id as i64))
        .fetch_all(&self.pool)
        .await?;

        let mut silences = Vec::with_capacity(rows.len());
        for row in rows {
            let silence = row.into_silence()?;
            if filter.accepts(&silence) {
                silences.push(silence);
            }
        }
        Ok(silences)
    }
}
