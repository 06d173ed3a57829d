//! File notifier: appends message details as JSON lines.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{Notifier, config_str};
use crate::notification::message::Message;
use crate::{Error, Result};

pub const RECEIVER_TYPE_FILE: &str = "file";

const CONFIG_KEY_URL: &str = "url";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for FileConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Default)]
pub struct FileNotifier;

impl FileNotifier {
    pub fn new() -> Self {
        Self
    }

    /// The file name must look like `name.ext`.
    fn validate_file_path(path: &str) -> Result<()> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let parts: Vec<&str> = file_name.split('.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::invalid(format!("invalid filename for {path:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    fn receiver_type(&self) -> &str {
        RECEIVER_TYPE_FILE
    }

    async fn pre_hook_queue_transform_configs(
        &self,
        configs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let path = config_str(&configs, CONFIG_KEY_URL)?;
        Self::validate_file_path(path)?;
        let mut normalized = Map::new();
        normalized.insert(CONFIG_KEY_URL.to_string(), Value::String(path.to_string()));
        Ok(normalized)
    }

    async fn publish(&self, _cancel: &CancellationToken, message: &Message) -> Result<()> {
        let path = config_str(&message.configs, CONFIG_KEY_URL)?;
        Self::validate_file_path(path)?;

        let mut line = serde_json::to_vec(&message.details)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(path))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
