//! Duplicate-submission guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A claimed `(scope, key)` pair.
///
/// `notification_id` stays empty until the guarded dispatch succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idempotency {
    pub id: String,
    pub scope: String,
    pub key: String,
    pub notification_id: String,
    pub created_at: DateTime<Utc>,
}

impl Idempotency {
    /// Whether the guarded dispatch went through.
    pub fn is_completed(&self) -> bool {
        !self.notification_id.is_empty()
    }
}
