use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use alert_relay::config::{QueueKind, RelayConfig};
use alert_relay::database::{
    self,
    repositories::{IdempotencyRepository, SqlxIdempotencyRepository},
};
use alert_relay::logging::init_logging;
use alert_relay::notification::{CleanupJob, Handler};
use alert_relay::notifier::NotifierRegistry;
use alert_relay::queue::{MemoryQueue, Queue, SqliteQueue, Strategy};
use alert_relay::telemetry::MetricsCollector;
use alert_relay::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("ALERT_RELAY_LOG_FORMAT").is_ok_and(|v| v == "json");
    let _logging = init_logging(json_logs)?;

    let config = RelayConfig::from_env()?;
    config.validate()?;

    let notifiers = NotifierRegistry::from_config(&config.notifiers)?;
    if notifiers.is_empty() {
        warn!("No notifier enabled; handlers will not publish anything");
    }
    let telemetry = Arc::new(MetricsCollector::new());
    let cancel = CancellationToken::new();
    let mut workers = Vec::new();

    let queue: Arc<dyn Queue>;
    let mut dlq: Option<Arc<dyn Queue>> = None;
    let mut idempotencies: Option<Arc<dyn IdempotencyRepository>> = None;
    match config.queue.kind {
        QueueKind::Sqlite => {
            let pool = database::init_pool_with_size(
                &config.queue.database_url,
                config.queue.max_connections,
            )
            .await?;
            database::run_migrations(&pool).await?;

            queue = Arc::new(SqliteQueue::new(pool.clone(), Strategy::Default));
            dlq = Some(Arc::new(SqliteQueue::new(pool.clone(), Strategy::Dlq)));
            idempotencies = Some(Arc::new(SqlxIdempotencyRepository::new(pool)));
        }
        QueueKind::Memory => {
            queue = Arc::new(MemoryQueue::new(config.queue.capacity));
        }
    }

    let handler_config = &config.notification.message_handler;
    if handler_config.enabled {
        let handler = Handler::new(
            "message-handler",
            handler_config,
            queue.clone(),
            notifiers.clone(),
            telemetry.clone(),
        );
        workers.push(Worker::spawn(Arc::new(handler), cancel.clone()));
    }

    let dlq_config = &config.notification.dlq_handler;
    match (&dlq, dlq_config.enabled) {
        (Some(dlq), true) => {
            let handler = Handler::new(
                "dlq-handler",
                dlq_config,
                dlq.clone(),
                notifiers.clone(),
                telemetry.clone(),
            );
            workers.push(Worker::spawn(Arc::new(handler), cancel.clone()));
        }
        (None, true) => warn!("Dead-letter handler requires the sqlite queue; not started"),
        _ => {}
    }

    if config.cleanup.enabled {
        let job = CleanupJob::new(&config.cleanup, queue.clone(), idempotencies)?;
        workers.push(Worker::spawn(Arc::new(job), cancel.clone()));
    }

    info!(
        queue = queue.queue_type(),
        workers = workers.len(),
        "alert-relay started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    for result in join_all(workers).await {
        if let Err(e) = result? {
            warn!(error = %e, "Worker finished with error");
        }
    }

    queue.stop().await?;
    info!(metrics = ?telemetry.snapshot(), "alert-relay stopped");
    Ok(())
}
