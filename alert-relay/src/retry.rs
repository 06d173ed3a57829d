//! Generic retry runner for outbound delivery calls.

use std::future::Future;
use std::time::Duration;

use rand::random;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_WAIT_MS: u64 = 20;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first attempt. Zero makes a single attempt.
    pub max_retries: u32,
    /// Wait between attempts. Zero falls back to 20ms.
    pub wait_ms: u64,
    /// Exponential backoff with full jitter instead of a fixed wait.
    pub backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            wait_ms: DEFAULT_WAIT_MS,
            backoff: false,
        }
    }
}

/// Re-runs an operation while it fails with a retryable delivery error.
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(mut config: RetryConfig) -> Self {
        if config.wait_ms == 0 {
            config.wait_ms = DEFAULT_WAIT_MS;
        }
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn delay(&self, attempt: u32) -> Duration {
        let wait = Duration::from_millis(self.config.wait_ms);
        if !self.config.backoff {
            return wait;
        }

        let exp = wait.saturating_mul(2u32.saturating_pow(attempt.saturating_add(1)));
        exp.mul_f64(random::<f64>())
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// The wait between attempts is cut short by cancellation, in which case
    /// the last error is returned.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return op().await;
        }

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Other("operation cancelled".to_string()));
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = self.delay(attempt);
            debug!(
                "Retryable failure, retrying in {:?} (attempt {}/{}): {}",
                delay,
                attempt + 1,
                self.config.max_retries,
                err
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrier(max_retries: u32) -> Retrier {
        Retrier::new(RetryConfig {
            max_retries,
            wait_ms: 1,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retrier(4)
            .run(&CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::retryable("503")) }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retrier(4)
            .run(&CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::delivery("400")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let calls = AtomicU32::new(0);
        let result = retrier(3)
            .run(&CancellationToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::retryable("429"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let retrier = retrier(0);
        assert_eq!(retrier.config().max_retries, 0);

        let result: Result<()> = retrier
            .run(&CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::retryable("503")) }
            })
            .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_runs_once() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(RetryConfig {
            enabled: false,
            ..Default::default()
        });
        let _: Result<()> = retrier
            .run(&CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::retryable("503")) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let retrier = Retrier::new(RetryConfig {
            max_retries: 10,
            wait_ms: 60_000,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<()> = retrier
            .run(&cancel, || async { Err(Error::retryable("503")) })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_delay_bounded() {
        let retrier = Retrier::new(RetryConfig {
            backoff: true,
            wait_ms: 10,
            ..Default::default()
        });
        for attempt in 0..4 {
            let bound = Duration::from_millis(10 * 2u64.pow(attempt + 1));
            assert!(retrier.delay(attempt) <= bound);
        }
    }
}
