use crate::merge::MergeResult;
use crate::retry::{ErrorClass, RetryClassifiable, RetryError};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, MutationError>;

/// Why a mutation or read did not go through.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("issue {id} not found")]
    IssueNotFound { id: String },

    #[error("collection {path} not found")]
    CollectionNotFound { path: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Both sides edited the same field. Nothing was written.
    #[error("merge conflict on {}", conflicted_fields(.0))]
    MergeConflict(Box<MergeResult>),

    #[error("concurrent modification: gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode collection: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl MutationError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MutationError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP-equivalent status for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            MutationError::IssueNotFound { .. } | MutationError::CollectionNotFound { .. } => 404,
            MutationError::Validation { .. } => 400,
            MutationError::MergeConflict(_) => 409,
            MutationError::RetriesExhausted { .. } => 500,
            MutationError::Store(StoreError::VersionConflict { .. }) => 500,
            MutationError::Store(_) => 502,
            MutationError::Encode(_) | MutationError::MalformedRecord { .. } => 500,
            MutationError::Cancelled => 503,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MutationError::MergeConflict(_))
    }
}

impl RetryClassifiable for MutationError {
    fn classify(&self) -> ErrorClass {
        match self {
            MutationError::Store(StoreError::VersionConflict { .. }) => ErrorClass::Retryable,
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<RetryError<MutationError>> for MutationError {
    fn from(err: RetryError<MutationError>) -> Self {
        match err {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { retries, .. } => MutationError::RetriesExhausted {
                attempts: retries.saturating_add(1),
            },
            RetryError::Aborted { .. } => MutationError::Cancelled,
        }
    }
}

fn conflicted_fields(result: &MergeResult) -> String {
    result
        .conflicts
        .iter()
        .map(|c| c.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_conflicts_retry() {
        let race = MutationError::Store(StoreError::VersionConflict {
            path: "issues.jsonl".to_string(),
        });
        let rejected = MutationError::Store(StoreError::Rejected {
            path: "issues.jsonl".to_string(),
            reason: "forbidden".to_string(),
        });
        assert!(race.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!MutationError::validation("title", "empty").is_retryable());
        assert_eq!(rejected.status_code(), 502);
    }

    #[test]
    fn exhausted_reports_total_attempts() {
        let err: MutationError = RetryError::Exhausted {
            last: MutationError::Cancelled,
            retries: 3,
        }
        .into();
        assert!(matches!(err, MutationError::RetriesExhausted { attempts: 4 }));
        assert_eq!(err.status_code(), 500);
    }
}
