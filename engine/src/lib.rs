//! Optimistic concurrency over issue collections kept as whole files in a
//! versioned content store.
//!
//! A mutation reads the current file and its version, decodes it, applies
//! the change (through a field-level three-way merge for updates), and
//! writes it back conditionally. Lost version races are retried with
//! capped exponential backoff; merge conflicts stop immediately without a
//! write.

pub mod action_log;
pub mod codec;
pub mod error;
pub mod merge;
pub mod ops;
pub mod retry;
pub mod store;
pub mod types;

pub use action_log::{
    ActionLogEntry, ActionLogSink, JsonlFileSink, MemorySink, NoopSink, Operation, Redactor,
    TracingSink,
};
pub use error::{MutationError, Result};
pub use merge::{FieldConflict, MergeResult, MergeStatus, merge};
pub use ops::{
    BulkUpdateOutcome, BulkUpdateRequest, BulkUpdates, IssueEngine, ListFilter, ListOutcome,
    MarkdownUpdateOutcome, NewComment, UpdateOutcome, UpdateRequest,
};
pub use retry::{Delay, RetryPolicy, TokioDelay};
pub use store::{ContentStore, FsStore, MemoryStore, StoreError, StoredFile, Version};
pub use types::{
    CollectionRef, Comment, EditableField, FieldValue, Issue, IssuePatch, IssueType, NewIssue,
    Status, Tombstone,
};

/// Current time as RFC 3339 UTC with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
