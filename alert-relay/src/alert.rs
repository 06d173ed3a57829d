//! Alerts as received from monitoring providers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub provider_id: u64,
    pub namespace_id: u64,
    pub resource_name: String,
    pub metric_name: String,
    pub metric_value: String,
    pub severity: String,
    pub rule: String,
    pub group_key: String,
    /// `FIRING` or `RESOLVED`.
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub generator_url: String,
    pub fingerprint: String,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Owner of alert rows; told whether each dispatch was silenced.
#[async_trait]
pub trait AlertService: Send + Sync {
    async fn update_silence_status(
        &self,
        alert_ids: &[i64],
        has_silenced: bool,
        has_non_silenced: bool,
    ) -> Result<()>;
}
