//! Notifier plugins.
//!
//! A notifier delivers messages of one receiver type:
//! - `http`: POST the message details to a webhook URL
//! - `file`: append the message details to a local file as a JSON line

mod file;
mod registry;
mod webhook;

pub use file::{FileConfig, FileNotifier};
pub use registry::NotifierRegistry;
pub use webhook::{WebhookConfig, WebhookNotifier};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::notification::message::Message;

/// Trait for notifier plugins.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Receiver type this notifier handles.
    fn receiver_type(&self) -> &str;

    /// Validate and normalize receiver configs before a message is enqueued.
    async fn pre_hook_queue_transform_configs(
        &self,
        configs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        Ok(configs)
    }

    /// Transform message configs after dequeue, right before publishing.
    async fn post_hook_queue_transform_configs(
        &self,
        configs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        Ok(configs)
    }

    fn system_default_template(&self) -> &str {
        ""
    }

    /// Deliver one message. Failures worth retrying later are
    /// `Error::Delivery { retryable: true, .. }`.
    async fn publish(&self, cancel: &CancellationToken, message: &Message) -> Result<()>;
}

/// Read a required string entry from message configs.
pub(crate) fn config_str<'a>(configs: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    configs
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| crate::Error::invalid(format!("missing '{key}' in receiver configuration")))
}
