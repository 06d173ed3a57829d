use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{FileNotifier, Notifier, WebhookNotifier};
use crate::config::NotifierConfig;
use crate::{Error, Result};

/// Notifier plugins by receiver type, built once at startup.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled notifiers in `config`.
    pub fn from_config(config: &NotifierConfig) -> Result<Self> {
        let mut registry = Self::new();
        if config.http.enabled {
            registry.register(Arc::new(WebhookNotifier::new(config.http.clone())?));
        }
        if config.file.enabled {
            registry.register(Arc::new(FileNotifier::new()));
        }
        info!(receiver_types = ?registry.receiver_types(), "Notifier registry initialized");
        Ok(registry)
    }

    /// Register a notifier, replacing any previous one of the same type.
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers
            .insert(notifier.receiver_type().to_string(), notifier);
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.register(notifier);
        self
    }

    pub fn get(&self, receiver_type: &str) -> Result<Arc<dyn Notifier>> {
        self.notifiers
            .get(receiver_type)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unsupported receiver type: {receiver_type:?}")))
    }

    pub fn contains(&self, receiver_type: &str) -> bool {
        self.notifiers.contains_key(receiver_type)
    }

    /// Registered receiver types, sorted.
    pub fn receiver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.notifiers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("receiver_types", &self.receiver_types())
            .finish()
    }
}
