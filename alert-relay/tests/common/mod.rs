#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use alert_relay::database::{self, DbPool};
use alert_relay::notification::message::{Message, MessageStatus};
use alert_relay::notifier::Notifier;
use alert_relay::queue::MessageBatchHandler;
use alert_relay::{Error, Result};

/// A migrated SQLite database in a temporary directory.
pub async fn setup_pool(max_connections: u32) -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}?mode=rwc",
        dir.path()
            .join("relay.db")
            .to_string_lossy()
            .replace('\\', "/")
    );
    let pool = database::init_pool_with_size(&url, max_connections)
        .await
        .unwrap();
    database::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

pub fn message(id: &str, receiver_type: &str) -> Message {
    let now = Utc::now();
    Message {
        id: id.to_string(),
        status: MessageStatus::Enqueued,
        receiver_type: receiver_type.to_string(),
        configs: Map::new(),
        details: Map::new(),
        last_error: String::new(),
        max_tries: 3,
        try_count: 0,
        retryable: false,
        expired_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Batch handler that keeps every claimed batch.
#[derive(Default)]
pub struct CollectingHandler {
    pub batches: Mutex<Vec<Vec<Message>>>,
}

impl CollectingHandler {
    pub fn ids(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .iter()
            .map(|b| b.iter().map(|m| m.id.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl MessageBatchHandler for CollectingHandler {
    async fn handle(&self, _cancel: &CancellationToken, messages: Vec<Message>) -> Result<()> {
        self.batches.lock().push(messages);
        Ok(())
    }
}

/// Notifier that records what it publishes and fails on request.
pub struct StubNotifier {
    receiver_type: String,
    failures: Mutex<Vec<bool>>,
    pub published: Mutex<Vec<Message>>,
}

impl StubNotifier {
    pub fn new(receiver_type: &str) -> Arc<Self> {
        Arc::new(Self {
            receiver_type: receiver_type.to_string(),
            failures: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next(&self, retryable: bool) {
        self.failures.lock().push(retryable);
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    fn receiver_type(&self) -> &str {
        &self.receiver_type
    }

    async fn publish(&self, _cancel: &CancellationToken, message: &Message) -> Result<()> {
        if let Some(retryable) = self.failures.lock().pop() {
            return Err(if retryable {
                Error::retryable("upstream returned 503")
            } else {
                Error::delivery("upstream returned 400")
            });
        }
        self.published.lock().push(message.clone());
        Ok(())
    }
}

pub async fn row_status(pool: &DbPool, id: &str) -> (String, i64, bool) {
    sqlx::query_as("SELECT status, try_count, retryable FROM message_queue WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn to_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
