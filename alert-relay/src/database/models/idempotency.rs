//! Idempotency key row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::notification::idempotency::Idempotency;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdempotencyDbModel {
    pub id: String,
    pub scope: String,
    pub key: String,
    /// Empty until the dispatch it guards has succeeded.
    pub notification_id: String,
    pub created_at: i64,
}

impl From<IdempotencyDbModel> for Idempotency {
    fn from(model: IdempotencyDbModel) -> Self {
        Self {
            id: model.id,
            scope: model.scope,
            key: model.key,
            notification_id: model.notification_id,
            created_at: ms_to_datetime(model.created_at),
        }
    }
}
