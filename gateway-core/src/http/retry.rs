//! Bounded retry with exponential backoff
//!
//! Only errors flagged `retriable` by the classifier are retried, so local
//! precondition failures and non-transient statuses surface immediately.

use crate::config::ValidationError;
use crate::error::GatewayError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds)
    pub max_delay_ms: u64,

    /// Base for exponential backoff (e.g., 2.0 for doubling)
    pub exponential_base: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter_factor: f64,

    /// Whether a Retry-After hint raises the next delay
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter_factor: 0.0,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, never retried
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Set the base delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Delay before retry number `retry` (0 for the first retry)
    ///
    /// The backoff doubles (by `exponential_base`) each retry and is capped at
    /// `max_delay_ms`. A Retry-After hint acts as a lower bound, still capped.
    pub fn calculate_delay(&self, retry: u32, error: &GatewayError) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay_ms as f64 * self.exponential_base.powi(exponent);
        let max_delay = self.max_delay_ms as f64;
        let capped_delay = base_delay.min(max_delay);

        let mut delay_ms = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).clamp(0.0, max_delay)
        } else {
            capped_delay
        };

        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_after {
                delay_ms = delay_ms.max(retry_after.as_millis() as f64).min(max_delay);
            }
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether another attempt may follow `attempts_made` failed attempts
    pub fn should_retry(&self, error: &GatewayError, attempts_made: u32) -> bool {
        error.retriable && attempts_made < self.max_attempts
    }

    /// Validate retry policy
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.max_attempts", path),
                "Must be at least 1",
            ));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ValidationError::incompatible(
                format!("{}.max_delay_ms", path),
                "Must be >= initial_delay_ms",
            ));
        }

        if self.exponential_base < 1.0 {
            return Err(ValidationError::out_of_range(
                format!("{}.exponential_base", path),
                "Must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ValidationError::out_of_range(
                format!("{}.jitter_factor", path),
                "Must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result
    pub result: Result<T, GatewayError>,

    /// Number of attempts made
    pub attempts: u32,

    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, GatewayError> {
        self.result
    }
}

/// Executor for retry operations
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancellation: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancellation: None,
        }
    }

    /// Stop retrying as soon as `token` is cancelled
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// bound is reached
    ///
    /// Delays never decrease from one retry to the next.
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        let mut delays: Vec<Duration> = Vec::new();

        loop {
            attempts += 1;
            let error = match operation(attempts).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        delays,
                    }
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error, attempts) {
                if error.retriable && attempts > 1 {
                    warn!("Giving up after {} attempts: {}", attempts, error);
                }
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                    delays,
                };
            }

            let previous = delays.last().copied().unwrap_or_default();
            let delay = self.policy.calculate_delay(attempts - 1, &error).max(previous);
            debug!(
                "Attempt {} failed ({}), retrying in {:?}",
                attempts, error.kind, delay
            );
            delays.push(delay);

            match &self.cancellation {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return RetryOutcome {
                                result: Err(GatewayError::cancelled()),
                                attempts,
                                delays,
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
