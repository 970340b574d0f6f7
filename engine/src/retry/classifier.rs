//! Error classification for retry decisions

/// Top-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lost a version race; fetch again and retry after backoff.
    Retryable,

    /// Anything else. Retrying cannot change the outcome.
    Permanent,
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }
}
