//! Silence row.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::silence::{Silence, SilenceType};
use crate::{Error, Result};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SilenceDbModel {
    pub id: String,
    pub namespace_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub silence_type: String,
    pub target_id: i64,
    /// JSON object
    pub target_expression: String,
    pub creator: String,
    pub comment: String,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl SilenceDbModel {
    pub fn from_silence(silence: &Silence) -> Result<Self> {
        Ok(Self {
            id: silence.id.clone(),
            namespace_id: silence.namespace_id as i64,
            silence_type: silence.silence_type.to_string(),
            target_id: silence.target_id as i64,
            target_expression: serde_json::to_string(&silence.target_expression)?,
            creator: silence.creator.clone(),
            comment: silence.comment.clone(),
            created_at: datetime_to_ms(silence.created_at),
            deleted_at: silence.deleted_at.map(datetime_to_ms),
        })
    }

    pub fn into_silence(self) -> Result<Silence> {
        let silence_type = SilenceType::from_str(&self.silence_type).map_err(|_| {
            Error::Database(format!(
                "silence {} has unknown type {:?}",
                self.id, self.silence_type
            ))
        })?;

        Ok(Silence {
            id: self.id,
            namespace_id: self.namespace_id as u64,
            silence_type,
            target_id: self.target_id as u64,
            target_expression: serde_json::from_str(&self.target_expression)?,
            creator: self.creator,
            comment: self.comment,
            created_at: ms_to_datetime(self.created_at),
            deleted_at: self.deleted_at.map(ms_to_datetime),
        })
    }
}
