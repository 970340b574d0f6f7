//! Backoff strategy and the retry loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::RetryError;
use super::classifier::RetryClassifiable;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `3` means up to 4 attempts.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep before retry `retry` (0-based): `min(base * multiplier^retry, max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Reject policies whose delays would not grow.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 1.0 {
            return Err(format!(
                "backoff_multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

/// Where backoff sleeps happen.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production delay backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A successful value and the retries spent getting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub retry_count: u32,
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// retries, or `cancel` fires.
///
/// `operation` receives the 0-based attempt number and must do a full
/// fetch-and-write each time; nothing is carried across attempts.
/// Cancellation is checked before every attempt and races each backoff
/// sleep.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    delay: &dyn Delay,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::error::Error + RetryClassifiable + 'static,
{
    let mut retries: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Aborted { retries });
        }

        match operation(retries).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    retry_count: retries,
                });
            }
            Err(error) if !error.is_retryable() => {
                return Err(RetryError::Permanent { error, retries });
            }
            Err(error) => {
                if retries >= policy.max_retries {
                    tracing::warn!(retries, %error, "giving up after version races");
                    return Err(RetryError::Exhausted {
                        last: error,
                        retries,
                    });
                }

                let wait = policy.delay_for(retries);
                tracing::debug!(
                    attempt = retries + 1,
                    delay_ms = wait.as_millis() as u64,
                    %error,
                    "retrying after backoff"
                );

                tokio::select! {
                    _ = delay.sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Aborted { retries });
                    }
                }
                retries += 1;
            }
        }
    }
}
