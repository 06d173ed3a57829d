//! Background tasks: a poll loop and the supervisor that spawns it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;

/// Fixed-interval poll loop.
#[derive(Debug, Clone)]
pub struct Ticker {
    id: String,
    poll_interval: Duration,
}

impl Ticker {
    pub fn new(id: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            id: id.into(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Call `f` on every tick until `cancel` fires. Errors are logged.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut f: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(worker_id = %self.id, interval = ?self.poll_interval, "Worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(worker_id = %self.id, "Worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = f().await {
                        error!(worker_id = %self.id, error = %e, "Worker tick failed");
                    }
                }
            }
        }
    }
}

/// A long-running task that stops when its token is cancelled.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Runs one [`Runnable`] on the tokio runtime.
pub struct Worker;

impl Worker {
    pub fn spawn(task: Arc<dyn Runnable>, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let result = task.run(cancel.clone()).await;
            if let Err(e) = &result {
                if cancel.is_cancelled() {
                    info!(worker_id = %task.id(), "Worker stopped during shutdown");
                    return Ok(());
                }
                error!(worker_id = %task.id(), error = %e, "Worker exited with error");
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ticker_runs_until_cancelled() {
        let ticker = Ticker::new("test", Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.cancel();
        });

        ticker
            .run(&cancel, || async {
                // errors do not stop the loop
                if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    Err(Error::Other("boom".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    struct FailsOnCancel;

    #[async_trait]
    impl Runnable for FailsOnCancel {
        fn id(&self) -> &str {
            "fails-on-cancel"
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Err(Error::Other("interrupted".to_string()))
        }
    }

    #[tokio::test]
    async fn test_worker_graceful_cancellation() {
        let cancel = CancellationToken::new();
        let handle = Worker::spawn(Arc::new(FailsOnCancel), cancel.clone());
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
