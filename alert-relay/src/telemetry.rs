//! Observability port for dispatch and delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::notification::message::MessageStatus;

/// Metrics sink injected into the dispatcher and the handler.
pub trait Telemetry: Send + Sync {
    /// A subscriber notification matched no subscription.
    fn subscriber_not_found(&self, namespace_id: u64);

    /// A message reached `status` during handling.
    fn message_status(&self, receiver_type: &str, status: MessageStatus);

    /// Time between a message's creation and its pickup by a handler.
    fn message_queue_time(&self, receiver_type: &str, millis: u64);

    /// A notifier hook failed; `condition` names the hook.
    fn hook_failed(&self, receiver_type: &str, condition: &str);
}

/// Telemetry that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn subscriber_not_found(&self, _namespace_id: u64) {}
    fn message_status(&self, _receiver_type: &str, _status: MessageStatus) {}
    fn message_queue_time(&self, _receiver_type: &str, _millis: u64) {}
    fn hook_failed(&self, _receiver_type: &str, _condition: &str) {}
}

/// In-process metrics collector.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    subscriber_not_found_total: AtomicU64,
    // keyed by "receiver_type:status"
    message_status_total: DashMap<String, AtomicU64>,
    queue_time_total_ms: DashMap<String, AtomicU64>,
    queue_time_count: DashMap<String, AtomicU64>,
    // keyed by "receiver_type:condition"
    hook_failed_total: DashMap<String, AtomicU64>,
}

fn increment(map: &DashMap<String, AtomicU64>, key: String, by: u64) {
    map.entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(by, Ordering::Relaxed);
}

fn load_all(map: &DashMap<String, AtomicU64>) -> HashMap<String, u64> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = load_all(&self.queue_time_total_ms);
        let counts = load_all(&self.queue_time_count);
        let queue_time_avg_ms = totals
            .iter()
            .map(|(key, total)| {
                let count = counts.get(key).copied().unwrap_or(0);
                let avg = if count == 0 {
                    0.0
                } else {
                    *total as f64 / count as f64
                };
                (key.clone(), avg)
            })
            .collect();

        MetricsSnapshot {
            subscriber_not_found_total: self.subscriber_not_found_total.load(Ordering::Relaxed),
            message_status_total: load_all(&self.message_status_total),
            message_queue_time_avg_ms: queue_time_avg_ms,
            hook_failed_total: load_all(&self.hook_failed_total),
        }
    }
}

impl Telemetry for MetricsCollector {
    fn subscriber_not_found(&self, _namespace_id: u64) {
        self.subscriber_not_found_total
            .fetch_add(1, Ordering::Relaxed);
    }

    fn message_status(&self, receiver_type: &str, status: MessageStatus) {
        increment(
            &self.message_status_total,
            format!("{receiver_type}:{status}"),
            1,
        );
    }

    fn message_queue_time(&self, receiver_type: &str, millis: u64) {
        increment(&self.queue_time_total_ms, receiver_type.to_string(), millis);
        increment(&self.queue_time_count, receiver_type.to_string(), 1);
    }

    fn hook_failed(&self, receiver_type: &str, condition: &str) {
        increment(
            &self.hook_failed_total,
            format!("{receiver_type}:{condition}"),
            1,
        );
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub subscriber_not_found_total: u64,
    pub message_status_total: HashMap<String, u64>,
    pub message_queue_time_avg_ms: HashMap<String, f64>,
    pub hook_failed_total: HashMap<String, u64>,
}
