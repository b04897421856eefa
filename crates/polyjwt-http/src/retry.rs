use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use crate::result::{ErrorCategory, ErrorDetail, HttpResult, RetryMetrics};

/// Tuning knobs for [`RetryStrategy`], matching the abstract configuration
/// surface in spec §6.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff with jitter over a retryable HTTP operation
/// (spec §4.4). Never throws: every outcome, including retry exhaustion,
/// is represented as a value on the returned [`HttpResult`].
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before attempt `n` (1-indexed), including jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.config.initial_delay.mul_f64(exp).min(self.config.max_delay);
        let jitter = rand::thread_rng()
            .gen_range(-self.config.jitter_factor..=self.config.jitter_factor);
        base.mul_f64((1.0 + jitter).max(0.0))
    }

    /// Run `op` (one attempt per call, 1-indexed) until it succeeds, is
    /// not retryable, or `max_attempts` is reached. Honors `cancel`:
    /// cancellation observed during the inter-attempt sleep yields an
    /// `Error` result with `ErrorCategory::Interrupted` rather than
    /// continuing the loop.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> HttpResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HttpResult<T>>,
    {
        let start = Instant::now();
        let max_attempts = if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        let mut last = op(attempt).await;

        while last.is_retryable() && attempt < max_attempts {
            let delay = self.delay_for(attempt);
            tokio::select! {
                () = cancel.cancelled() => {
                    return HttpResult::error(
                        ErrorDetail {
                            category: ErrorCategory::Interrupted,
                            message: "retry loop interrupted during backoff sleep".into(),
                        },
                        last.http_status,
                        start.elapsed(),
                    );
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
            last = op(attempt).await;
        }

        if attempt > 1 {
            let metrics = RetryMetrics {
                attempts: attempt,
                total_elapsed: start.elapsed(),
            };
            if last.is_retryable() {
                last.retry_metrics = Some(metrics);
            } else {
                last.promote_recovered(metrics);
            }
        }

        last
    }
}
