//! Mutation and read operations over a collection.
//!
//! Every mutation is a closure over one attempt (fetch, change, conditional
//! write) run by [`execute_with_retry`]. Nothing is cached between
//! attempts or between requests; the store's compare-and-swap is the only
//! point of serialization.

mod markdown;

pub use markdown::MarkdownUpdateOutcome;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::action_log::{ActionLogEntry, ActionLogSink, Operation, Redactor, TracingSink};
use crate::codec::{IssueCollection, SkippedEntry, TombstoneLog};
use crate::error::{MutationError, Result};
use crate::merge::{MergeResult, merge};
use crate::now_rfc3339;
use crate::retry::{Attempted, Delay, RetryError, RetryPolicy, TokioDelay, execute_with_retry};
use crate::store::{ContentStore, Version};
use crate::types::{
    CollectionRef, Comment, Issue, IssuePatch, IssueType, NewIssue, Status, Tombstone,
    validate_priority,
};

pub const DEFAULT_ID_PREFIX: &str = "bd";
const ID_SUFFIX_LEN: usize = 6;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub updates: IssuePatch,
    /// The record as the caller saw it before editing. Absent means
    /// last-write-wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_state: Option<Issue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub merge_result: MergeResult,
    pub retry_count: u32,
}

/// The only fields a bulk update may set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateRequest {
    pub ids: Vec<String>,
    pub updates: BulkUpdates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateOutcome {
    pub updated: usize,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default, rename = "type", alias = "issue_type")]
    pub issue_type: Option<IssueType>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl ListFilter {
    fn matches(&self, issue: &Issue) -> bool {
        self.status.is_none_or(|s| s == issue.status)
            && self.issue_type.is_none_or(|t| t == issue.issue_type)
            && self
                .assignee
                .as_deref()
                .is_none_or(|a| issue.assignee.as_deref() == Some(a))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListOutcome {
    pub issues: Vec<Issue>,
    /// Lines of the collection that could not be decoded.
    pub skipped: Vec<SkippedEntry>,
}

/// What the action log needs to know about a request.
pub(crate) struct LogContext<'a> {
    pub(crate) operation: Operation,
    pub(crate) collection: &'a CollectionRef,
    pub(crate) issue_id: Option<&'a str>,
    pub(crate) payload: Value,
}

/// Runs mutations against one content store.
pub struct IssueEngine {
    store: Arc<dyn ContentStore>,
    policy: RetryPolicy,
    delay: Arc<dyn Delay>,
    action_log: Arc<dyn ActionLogSink>,
    redactor: Redactor,
    id_prefix: String,
}

impl IssueEngine {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            delay: Arc::new(TokioDelay),
            action_log: Arc::new(TracingSink),
            redactor: Redactor::default(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_action_log(mut self, sink: Arc<dyn ActionLogSink>) -> Self {
        self.action_log = sink;
        self
    }

    /// Redact these payload keys in addition to the defaults.
    pub fn with_redacted_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.redactor = Redactor::new(keys);
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Merge `request.updates` onto the current record and write it back.
    ///
    /// The caller's base and patch are re-merged against a fresh read on
    /// every attempt. A merge conflict ends the operation without a write.
    pub async fn update(
        &self,
        collection: &CollectionRef,
        id: &str,
        request: UpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let ctx = LogContext {
            operation: Operation::Update,
            collection,
            issue_id: Some(id),
            payload: to_payload(&request),
        };
        let precheck = request
            .updates
            .validate()
            .map_err(|(field, reason)| MutationError::validation(field, reason));
        let this = self;
        let request = &request;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.update_attempt(collection, id, request)
            })
            .await?;

        Ok(UpdateOutcome {
            merge_result: attempted.value,
            retry_count: attempted.retry_count,
        })
    }

    /// Append a new record under a fresh id. A missing collection file is
    /// created.
    pub async fn create(
        &self,
        collection: &CollectionRef,
        new_issue: NewIssue,
        cancel: &CancellationToken,
    ) -> Result<Issue> {
        let ctx = LogContext {
            operation: Operation::Create,
            collection,
            issue_id: None,
            payload: to_payload(&new_issue),
        };
        let precheck = new_issue
            .validate()
            .map_err(|(field, reason)| MutationError::validation(field, reason));
        let this = self;
        let new_issue = &new_issue;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.create_attempt(collection, new_issue)
            })
            .await?;
        Ok(attempted.value)
    }

    /// Tombstone `id`. Deleting an already deleted id succeeds without a
    /// write.
    pub async fn delete(
        &self,
        collection: &CollectionRef,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ctx = LogContext {
            operation: Operation::Delete,
            collection,
            issue_id: Some(id),
            payload: serde_json::json!({ "id": id }),
        };
        let this = self;
        self.run_logged(ctx, Ok(()), cancel, move |_| {
            this.delete_attempt(collection, id)
        })
        .await?;
        Ok(())
    }

    /// Apply `request.updates` to every listed id in one write.
    pub async fn bulk_update(
        &self,
        collection: &CollectionRef,
        request: BulkUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<BulkUpdateOutcome> {
        let ctx = LogContext {
            operation: Operation::BulkUpdate,
            collection,
            issue_id: None,
            payload: to_payload(&request),
        };
        let precheck = validate_bulk(&request);
        let this = self;
        let request = &request;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.bulk_update_attempt(collection, request)
            })
            .await?;
        Ok(BulkUpdateOutcome {
            updated: attempted.value,
            retry_count: attempted.retry_count,
        })
    }

    pub async fn add_comment(
        &self,
        collection: &CollectionRef,
        id: &str,
        comment: NewComment,
        cancel: &CancellationToken,
    ) -> Result<Comment> {
        let ctx = LogContext {
            operation: Operation::AddComment,
            collection,
            issue_id: Some(id),
            payload: to_payload(&comment),
        };
        let precheck = if comment.text.trim().is_empty() {
            Err(MutationError::validation("text", "must not be empty"))
        } else {
            Ok(())
        };
        let this = self;
        let comment = &comment;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.add_comment_attempt(collection, id, comment)
            })
            .await?;
        Ok(attempted.value)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Live records matching `filter`, in file order.
    pub async fn list(&self, collection: &CollectionRef, filter: &ListFilter) -> Result<ListOutcome> {
        let Some((issues, _)) = self.read_issues(collection).await? else {
            return Ok(ListOutcome {
                issues: Vec::new(),
                skipped: Vec::new(),
            });
        };
        let (tombstones, _) = self.read_tombstones(collection).await?;
        let (issues, skipped) = issues.into_parts();
        let issues = issues
            .into_iter()
            .filter(|i| !tombstones.contains(&i.id) && filter.matches(i))
            .collect();
        Ok(ListOutcome { issues, skipped })
    }

    /// A single live record.
    pub async fn get(&self, collection: &CollectionRef, id: &str) -> Result<Issue> {
        let not_found = || MutationError::IssueNotFound { id: id.to_string() };
        let Some((issues, _)) = self.read_issues(collection).await? else {
            return Err(not_found());
        };
        let (tombstones, _) = self.read_tombstones(collection).await?;
        if tombstones.contains(id) {
            return Err(not_found());
        }
        issues.get(id).cloned().ok_or_else(not_found)
    }

    // ── Single attempts ──────────────────────────────────────────────────

    async fn update_attempt(
        &self,
        collection: &CollectionRef,
        id: &str,
        request: &UpdateRequest,
    ) -> Result<MergeResult> {
        let (mut issues, version) = self.require_issues(collection).await?;
        let (tombstones, _) = self.read_tombstones(collection).await?;
        let remote = issues
            .get(id)
            .filter(|_| !tombstones.contains(id))
            .ok_or_else(|| MutationError::IssueNotFound { id: id.to_string() })?;

        let mut result = merge(request.base_state.as_ref(), &request.updates, remote);
        if result.is_conflict() {
            tracing::info!(
                %collection,
                id,
                conflicts = result.conflicts.len(),
                "merge conflict; not writing"
            );
            return Err(MutationError::MergeConflict(Box::new(result)));
        }

        let previous = remote.status;
        result.merged_issue.touch(previous, &now_rfc3339());
        issues.upsert(result.merged_issue.clone());

        self.write_issues(collection, &issues, Some(&version), &format!("Update issue {id}"))
            .await?;
        Ok(result)
    }

    async fn create_attempt(&self, collection: &CollectionRef, new_issue: &NewIssue) -> Result<Issue> {
        let (issues, version) = match self.read_issues(collection).await? {
            Some((issues, version)) => (issues, Some(version)),
            None => (IssueCollection::default(), None),
        };
        let (tombstones, _) = self.read_tombstones(collection).await?;

        if let Some(parent) = new_issue.parent.as_deref().filter(|p| !p.is_empty())
            && (!issues.contains(parent) || tombstones.contains(parent))
        {
            return Err(MutationError::validation(
                "parent",
                format!("no issue {parent} in {collection}"),
            ));
        }

        let id = self.fresh_id(|candidate| issues.contains(candidate) || tombstones.contains(candidate));
        let issue = new_issue.clone().into_issue(id, &now_rfc3339());
        let mut issues = issues;
        issues.upsert(issue.clone());

        self.write_issues(
            collection,
            &issues,
            version.as_ref(),
            &format!("Create issue {}", issue.id),
        )
        .await?;
        Ok(issue)
    }

    async fn delete_attempt(&self, collection: &CollectionRef, id: &str) -> Result<()> {
        let (issues, _) = self.require_issues(collection).await?;
        let (mut tombstones, version) = self.read_tombstones(collection).await?;
        if tombstones.contains(id) {
            tracing::debug!(%collection, id, "already deleted");
            return Ok(());
        }
        if !issues.contains(id) {
            return Err(MutationError::IssueNotFound { id: id.to_string() });
        }

        tombstones.push(Tombstone {
            id: id.to_string(),
            deleted_at: now_rfc3339(),
        });
        let path = collection.tombstones_path();
        self.store
            .write_if_version(
                &path,
                tombstones.encode()?,
                version.as_ref(),
                &format!("Delete issue {id}"),
            )
            .await?;
        Ok(())
    }

    async fn bulk_update_attempt(
        &self,
        collection: &CollectionRef,
        request: &BulkUpdateRequest,
    ) -> Result<usize> {
        let Some((mut issues, version)) = self.read_issues(collection).await? else {
            return Ok(0);
        };
        let (tombstones, _) = self.read_tombstones(collection).await?;

        let now = now_rfc3339();
        let mut seen = HashSet::new();
        let mut updated = 0;
        for id in &request.ids {
            if !seen.insert(id.as_str()) || tombstones.contains(id) {
                continue;
            }
            let Some(issue) = issues.get_mut(id) else {
                continue;
            };
            let previous = issue.status;
            if let Some(status) = request.updates.status {
                issue.status = status;
            }
            if let Some(priority) = request.updates.priority {
                issue.priority = priority;
            }
            issue.touch(previous, &now);
            updated += 1;
        }

        if updated == 0 {
            return Ok(0);
        }
        self.write_issues(
            collection,
            &issues,
            Some(&version),
            &format!("Bulk update {updated} issues"),
        )
        .await?;
        Ok(updated)
    }

    async fn add_comment_attempt(
        &self,
        collection: &CollectionRef,
        id: &str,
        comment: &NewComment,
    ) -> Result<Comment> {
        let (mut issues, version) = self.require_issues(collection).await?;
        let (tombstones, _) = self.read_tombstones(collection).await?;
        let issue = issues
            .get_mut(id)
            .filter(|_| !tombstones.contains(id))
            .ok_or_else(|| MutationError::IssueNotFound { id: id.to_string() })?;

        let now = now_rfc3339();
        let created = Comment {
            id: issue.next_comment_id(),
            author: comment.author.clone().filter(|a| !a.is_empty()),
            text: comment.text.clone(),
            created_at: now.clone(),
        };
        issue.comments.push(created.clone());
        issue.touch(issue.status, &now);

        self.write_issues(collection, &issues, Some(&version), &format!("Comment on issue {id}"))
            .await?;
        Ok(created)
    }

    // ── Plumbing ─────────────────────────────────────────────────────────

    pub(crate) async fn run_logged<T, F, Fut>(
        &self,
        ctx: LogContext<'_>,
        precheck: Result<()>,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<Attempted<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = match precheck {
            Ok(()) => execute_with_retry(&self.policy, self.delay.as_ref(), cancel, attempt).await,
            Err(error) => Err(RetryError::Permanent { error, retries: 0 }),
        };
        let retry_count = match &outcome {
            Ok(attempted) => attempted.retry_count,
            Err(e) => e.retries(),
        };
        let outcome = outcome.map_err(MutationError::from);

        self.action_log.record(ActionLogEntry {
            timestamp: now_rfc3339(),
            operation: ctx.operation,
            collection: ctx.collection.to_string(),
            issue_id: ctx.issue_id.map(str::to_string),
            success: outcome.is_ok(),
            retry_count,
            conflict_detected: matches!(&outcome, Err(e) if e.is_conflict()),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error: outcome.as_ref().err().map(ToString::to_string),
            payload: self.redactor.redact(ctx.payload),
        });
        outcome
    }

    async fn read_issues(
        &self,
        collection: &CollectionRef,
    ) -> Result<Option<(IssueCollection, Version)>> {
        let path = collection.issues_path();
        let Some(file) = self.store.read(&path).await? else {
            return Ok(None);
        };
        Ok(Some((IssueCollection::decode(&file.bytes), file.version)))
    }

    async fn require_issues(&self, collection: &CollectionRef) -> Result<(IssueCollection, Version)> {
        self.read_issues(collection)
            .await?
            .ok_or_else(|| MutationError::CollectionNotFound {
                path: collection.issues_path(),
            })
    }

    async fn read_tombstones(
        &self,
        collection: &CollectionRef,
    ) -> Result<(TombstoneLog, Option<Version>)> {
        let path = collection.tombstones_path();
        Ok(match self.store.read(&path).await? {
            Some(file) => (TombstoneLog::decode(&file.bytes), Some(file.version)),
            None => (TombstoneLog::default(), None),
        })
    }

    async fn write_issues(
        &self,
        collection: &CollectionRef,
        issues: &IssueCollection,
        expected: Option<&Version>,
        message: &str,
    ) -> Result<Version> {
        if !issues.skipped().is_empty() {
            tracing::warn!(
                %collection,
                dropped = issues.skipped().len(),
                "rewriting collection without its malformed lines"
            );
        }
        let path = collection.issues_path();
        let version = self
            .store
            .write_if_version(&path, issues.encode()?, expected, message)
            .await?;
        Ok(version)
    }

    /// `<prefix>-<suffix>` not rejected by `taken`. The suffix grows by one
    /// character after every 16 collisions.
    pub(crate) fn fresh_id(&self, taken: impl Fn(&str) -> bool) -> String {
        let mut rng = rand::rng();
        let mut collisions = 0usize;
        loop {
            let len = ID_SUFFIX_LEN + collisions / 16;
            let suffix: String = (0..len)
                .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
                .collect();
            let candidate = format!("{}-{suffix}", self.id_prefix);
            if !taken(&candidate) {
                return candidate;
            }
            collisions += 1;
        }
    }
}

fn validate_bulk(request: &BulkUpdateRequest) -> Result<()> {
    if request.ids.is_empty() {
        return Err(MutationError::validation("ids", "must not be empty"));
    }
    if request.ids.iter().any(|id| id.trim().is_empty()) {
        return Err(MutationError::validation("ids", "must not contain empty ids"));
    }
    if request.updates == BulkUpdates::default() {
        return Err(MutationError::validation(
            "updates",
            "must set at least one of status, priority",
        ));
    }
    if let Some(priority) = request.updates.priority {
        validate_priority(priority)
            .map_err(|(field, reason)| MutationError::validation(field, reason))?;
    }
    Ok(())
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    #[test]
    fn fresh_ids_use_prefix_and_base36() {
        let engine = IssueEngine::new(Arc::new(MemoryStore::new())).with_id_prefix("gh");
        let id = engine.fresh_id(|_| false);
        let suffix = id.strip_prefix("gh-").unwrap();
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn fresh_id_skips_taken_candidates() {
        let engine = IssueEngine::new(Arc::new(MemoryStore::new()));
        let calls = Cell::new(0);
        let id = engine.fresh_id(|_| {
            calls.set(calls.get() + 1);
            calls.get() <= 3
        });
        assert_eq!(calls.get(), 4);
        assert!(id.starts_with("bd-"));
    }

    #[test]
    fn list_filter_matches_all_given_fields() {
        let issue = NewIssue {
            title: "x".to_string(),
            issue_type: Some(IssueType::Bug),
            assignee: Some("kim".to_string()),
            ..Default::default()
        }
        .into_issue("bd-1".to_string(), "t");
        assert!(ListFilter::default().matches(&issue));
        assert!(
            ListFilter {
                issue_type: Some(IssueType::Bug),
                assignee: Some("kim".to_string()),
                ..Default::default()
            }
            .matches(&issue)
        );
        assert!(
            !ListFilter {
                status: Some(Status::Closed),
                ..Default::default()
            }
            .matches(&issue)
        );
    }

    #[test]
    fn bulk_validation() {
        assert!(validate_bulk(&BulkUpdateRequest::default()).is_err());
        let nothing_to_set = BulkUpdateRequest {
            ids: vec!["a".to_string()],
            updates: BulkUpdates::default(),
        };
        let err = validate_bulk(&nothing_to_set).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(err, MutationError::Validation { ref field, .. } if field == "updates"));
        let bad_priority = BulkUpdateRequest {
            ids: vec!["a".to_string()],
            updates: BulkUpdates {
                priority: Some(0),
                ..Default::default()
            },
        };
        assert!(matches!(
            validate_bulk(&bad_priority),
            Err(MutationError::Validation { .. })
        ));
    }
}
