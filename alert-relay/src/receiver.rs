//! Receivers: configured delivery targets of a given channel type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub receiver_type: String,
    pub labels: BTreeMap<String, String>,
    pub configurations: Map<String, Value>,
}

#[async_trait]
pub trait ReceiverService: Send + Sync {
    /// Fetch a receiver by id; a missing receiver is `Error::NotFound`.
    async fn get(&self, id: u64) -> Result<Receiver>;
}
