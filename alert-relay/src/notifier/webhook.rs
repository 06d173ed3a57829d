//! HTTP webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{Notifier, config_str};
use crate::notification::message::Message;
use crate::retry::{Retrier, RetryConfig};
use crate::{Error, Result};

pub const RECEIVER_TYPE_HTTP: &str = "http";

const CONFIG_KEY_URL: &str = "url";

/// Webhook notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            headers: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Posts message details as JSON to the receiver's `url`.
pub struct WebhookNotifier {
    client: Client,
    headers: HeaderMap,
    retrier: Retrier,
}

impl WebhookNotifier {
    /// Fails with [`Error::Configuration`] on an invalid header or client setup.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let headers = build_headers(&config.headers)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {e}")))?;

        Ok(Self {
            client,
            headers,
            retrier: Retrier::new(config.retry),
        })
    }

    fn parse_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw).map_err(|e| Error::invalid(format!("invalid url {raw:?}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::invalid(format!(
                "unsupported url scheme {other:?} in {raw:?}"
            ))),
        }
    }

    async fn notify(&self, url: &Url, details: &Map<String, Value>) -> Result<()> {
        let response = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .json(details)
            .send()
            .await
            .map_err(|e| {
                let message = format!("failure in http call: {e}");
                if e.is_timeout() || e.is_connect() {
                    Error::retryable(message)
                } else {
                    Error::delivery(message)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::retryable(status.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::delivery(format!("{status} - {body}")));
        }

        debug!(url = %url, "Webhook call succeeded");
        Ok(())
    }
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = name
            .parse::<HeaderName>()
            .map_err(|e| Error::config(format!("invalid webhook header name {name:?}: {e}")))?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|e| Error::config(format!("invalid webhook header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn receiver_type(&self) -> &str {
        RECEIVER_TYPE_HTTP
    }

    async fn pre_hook_queue_transform_configs(
        &self,
        configs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let url = Self::parse_url(config_str(&configs, CONFIG_KEY_URL)?)?;
        let mut normalized = Map::new();
        normalized.insert(CONFIG_KEY_URL.to_string(), Value::String(url.to_string()));
        Ok(normalized)
    }

    async fn publish(&self, cancel: &CancellationToken, message: &Message) -> Result<()> {
        let url = Self::parse_url(config_str(&message.configs, CONFIG_KEY_URL)?)?;
        self.retrier
            .run(cancel, || self.notify(&url, &message.details))
            .await
    }
}
