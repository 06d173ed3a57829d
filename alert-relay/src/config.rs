//! Runtime configuration.
//!
//! Defaults are overridden by `ALERT_RELAY_*` environment variables (a `.env`
//! file is loaded first when present).

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::notifier::{FileConfig, WebhookConfig};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:alert-relay.db?mode=rwc";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueueKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub kind: QueueKind,
    /// Channel capacity of the in-memory queue.
    pub capacity: usize,
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Sqlite,
            capacity: 1024,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Receiver types to handle; empty means every registered type.
    pub receiver_types: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            batch_size: 1,
            receiver_types: Vec::new(),
        }
    }
}

impl HandlerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Label keys used to group alerts; empty groups by the full label set.
    pub group_by: Vec<String>,
    pub message_handler: HandlerConfig,
    pub dlq_handler: HandlerConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            group_by: Vec::new(),
            message_handler: HandlerConfig::default(),
            dlq_handler: HandlerConfig {
                enabled: false,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Age after which published and exhausted rows are deleted, e.g. `7h`.
    pub message_published_time_threshold: String,
    /// Age after which stuck pending rows are re-enqueued; empty disables it.
    pub message_pending_time_threshold: String,
    /// Age after which idempotency keys are removed, e.g. `24h`.
    pub idempotency_ttl: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3_600,
            message_published_time_threshold: "7h".to_string(),
            message_pending_time_threshold: String::new(),
            idempotency_ttl: "24h".to_string(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub http: WebhookConfig,
    pub file: FileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub queue: QueueConfig,
    pub notification: NotificationConfig,
    pub cleanup: CleanupConfig,
    pub notifiers: NotifierConfig,
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| Error::config(format!("invalid value {raw:?} for {key}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("invalid boolean {raw:?} for {key}"))),
    }
}

fn parse_duration_ms(key: &str, raw: &str) -> Result<u64> {
    humantime::parse_duration(raw.trim())
        .map(|d| d.as_millis() as u64)
        .map_err(|e| Error::config(format!("invalid duration {raw:?} for {key}: {e}")))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a humantime threshold such as `7h`; empty means unset.
pub fn parse_threshold(raw: &str) -> Result<Option<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    humantime::parse_duration(raw)
        .map(Some)
        .map_err(|e| Error::config(format!("invalid duration {raw:?}: {e}")))
}

impl RelayConfig {
    /// Load `.env`, then apply environment overrides on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` on top of the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("ALERT_RELAY_QUEUE_KIND") {
            config.queue.kind = parse_var("ALERT_RELAY_QUEUE_KIND", &v)?;
        }
        if let Some(v) = var("ALERT_RELAY_QUEUE_CAPACITY") {
            config.queue.capacity = parse_var("ALERT_RELAY_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = var("ALERT_RELAY_DATABASE_URL").or_else(|| var("DATABASE_URL")) {
            config.queue.database_url = v;
        }
        if let Some(v) = var("ALERT_RELAY_DATABASE_MAX_CONNECTIONS") {
            config.queue.max_connections = parse_var("ALERT_RELAY_DATABASE_MAX_CONNECTIONS", &v)?;
        }

        if let Some(v) = var("ALERT_RELAY_GROUP_BY") {
            config.notification.group_by = parse_list(&v);
        }
        Self::apply_handler(&var, "ALERT_RELAY_HANDLER", &mut config.notification.message_handler)?;
        Self::apply_handler(&var, "ALERT_RELAY_DLQ_HANDLER", &mut config.notification.dlq_handler)?;

        if let Some(v) = var("ALERT_RELAY_CLEANUP_ENABLED") {
            config.cleanup.enabled = parse_bool("ALERT_RELAY_CLEANUP_ENABLED", &v)?;
        }
        if let Some(v) = var("ALERT_RELAY_CLEANUP_INTERVAL") {
            config.cleanup.interval_secs = parse_duration_ms("ALERT_RELAY_CLEANUP_INTERVAL", &v)? / 1000;
        }
        if let Some(v) = var("ALERT_RELAY_CLEANUP_PUBLISHED_THRESHOLD") {
            config.cleanup.message_published_time_threshold = v;
        }
        if let Some(v) = var("ALERT_RELAY_CLEANUP_PENDING_THRESHOLD") {
            config.cleanup.message_pending_time_threshold = v;
        }
        if let Some(v) = var("ALERT_RELAY_IDEMPOTENCY_TTL") {
            config.cleanup.idempotency_ttl = v;
        }

        if let Some(v) = var("ALERT_RELAY_HTTP_NOTIFIER_ENABLED") {
            config.notifiers.http.enabled = parse_bool("ALERT_RELAY_HTTP_NOTIFIER_ENABLED", &v)?;
        }
        if let Some(v) = var("ALERT_RELAY_HTTP_TIMEOUT_SECS") {
            config.notifiers.http.timeout_secs = parse_var("ALERT_RELAY_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("ALERT_RELAY_FILE_NOTIFIER_ENABLED") {
            config.notifiers.file.enabled = parse_bool("ALERT_RELAY_FILE_NOTIFIER_ENABLED", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_handler(
        var: &impl Fn(&str) -> Option<String>,
        prefix: &str,
        handler: &mut HandlerConfig,
    ) -> Result<()> {
        let key = |suffix: &str| format!("{prefix}_{suffix}");

        if let Some(v) = var(&key("ENABLED")) {
            handler.enabled = parse_bool(&key("ENABLED"), &v)?;
        }
        if let Some(v) = var(&key("POLL_INTERVAL")) {
            handler.poll_interval_ms = parse_duration_ms(&key("POLL_INTERVAL"), &v)?;
        }
        if let Some(v) = var(&key("BATCH_SIZE")) {
            handler.batch_size = parse_var(&key("BATCH_SIZE"), &v)?;
        }
        if let Some(v) = var(&key("RECEIVER_TYPES")) {
            handler.receiver_types = parse_list(&v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, handler) in [
            ("message handler", &self.notification.message_handler),
            ("dlq handler", &self.notification.dlq_handler),
        ] {
            if handler.batch_size == 0 {
                return Err(Error::config(format!("{name} batch size must be positive")));
            }
            if handler.poll_interval_ms == 0 {
                return Err(Error::config(format!("{name} poll interval must be positive")));
            }
        }
        if self.queue.kind == QueueKind::Memory && self.queue.capacity == 0 {
            return Err(Error::config("memory queue capacity must be positive"));
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(Error::config("cleanup interval must be positive"));
        }
        parse_threshold(&self.cleanup.message_published_time_threshold)?;
        parse_threshold(&self.cleanup.message_pending_time_threshold)?;
        parse_threshold(&self.cleanup.idempotency_ttl)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.queue.kind, QueueKind::Sqlite);
        assert_eq!(config.notification.message_handler.batch_size, 1);
        assert_eq!(
            config.notification.message_handler.poll_interval(),
            Duration::from_secs(5)
        );
        assert!(!config.notification.dlq_handler.enabled);
        assert_eq!(config.cleanup.message_published_time_threshold, "7h");
    }

    #[test]
    fn test_env_overrides() {
        let config = load(&[
            ("ALERT_RELAY_QUEUE_KIND", "Memory"),
            ("ALERT_RELAY_GROUP_BY", "team, severity"),
            ("ALERT_RELAY_HANDLER_POLL_INTERVAL", "250ms"),
            ("ALERT_RELAY_HANDLER_BATCH_SIZE", "10"),
            ("ALERT_RELAY_DLQ_HANDLER_ENABLED", "true"),
            ("ALERT_RELAY_DLQ_HANDLER_RECEIVER_TYPES", "http,file"),
            ("ALERT_RELAY_CLEANUP_INTERVAL", "10m"),
            ("DATABASE_URL", "sqlite:test.db"),
        ])
        .unwrap();

        assert_eq!(config.queue.kind, QueueKind::Memory);
        assert_eq!(config.queue.database_url, "sqlite:test.db");
        assert_eq!(config.notification.group_by, vec!["team", "severity"]);
        assert_eq!(config.notification.message_handler.poll_interval_ms, 250);
        assert_eq!(config.notification.message_handler.batch_size, 10);
        assert!(config.notification.dlq_handler.enabled);
        assert_eq!(config.notification.dlq_handler.receiver_types, vec!["http", "file"]);
        assert_eq!(config.cleanup.interval_secs, 600);
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            vec![("ALERT_RELAY_HANDLER_BATCH_SIZE", "0")],
            vec![("ALERT_RELAY_HANDLER_BATCH_SIZE", "many")],
            vec![("ALERT_RELAY_HANDLER_POLL_INTERVAL", "soon")],
            vec![("ALERT_RELAY_QUEUE_KIND", "kafka")],
            vec![("ALERT_RELAY_CLEANUP_ENABLED", "maybe")],
            vec![("ALERT_RELAY_CLEANUP_PUBLISHED_THRESHOLD", "xzx")],
        ] {
            let err = load(&vars).unwrap_err();
            assert!(
                matches!(err, Error::Configuration(_)),
                "{vars:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("").unwrap(), None);
        assert_eq!(parse_threshold("7h").unwrap(), Some(Duration::from_secs(7 * 3600)));
        assert!(parse_threshold("seven").is_err());
    }
}
