//! Bounded retry with exponential backoff
//!
//! This module provides:
//! - Error classification (retryable vs permanent)
//! - Exponential backoff, capped, without jitter
//! - Max retry limits (3 retries default, 4 attempts total)
//! - Cancellation support via `CancellationToken`
//! - An injectable [`Delay`] so tests never sleep

pub mod classifier;
pub mod strategy;

pub use classifier::{ErrorClass, RetryClassifiable};
pub use strategy::{Attempted, Delay, RetryPolicy, TokioDelay, execute_with_retry};

/// Terminal outcome of a retried operation.
///
/// `retries` counts the backoff sleeps taken before giving up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("permanent error after {retries} retries: {error}")]
    Permanent {
        #[source]
        error: E,
        retries: u32,
    },

    #[error("retries exhausted after {retries} retries: {last}")]
    Exhausted {
        #[source]
        last: E,
        retries: u32,
    },

    /// External cancellation requested
    #[error("retry aborted by cancellation")]
    Aborted { retries: u32 },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn retries(&self) -> u32 {
        match self {
            RetryError::Permanent { retries, .. }
            | RetryError::Exhausted { retries, .. }
            | RetryError::Aborted { retries } => *retries,
        }
    }
}
