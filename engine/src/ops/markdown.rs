//! One-file-per-issue layout. Writes here are last-write-wins: there is no
//! base state and no merge, the patch is simply re-applied to whatever
//! the file holds when the attempt reads it.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{IssueEngine, LogContext, to_payload};
use crate::action_log::Operation;
use crate::codec::{decode_markdown, encode_markdown};
use crate::error::{MutationError, Result};
use crate::now_rfc3339;
use crate::store::Version;
use crate::types::{CollectionRef, Issue, IssuePatch, NewIssue};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownUpdateOutcome {
    pub issue: Issue,
    pub retry_count: u32,
}

impl IssueEngine {
    /// Write a new `<dir>/issues/<id>.md`. An id that is already taken
    /// loses the create race and the next attempt draws a new one.
    pub async fn create_markdown(
        &self,
        collection: &CollectionRef,
        new_issue: NewIssue,
        cancel: &CancellationToken,
    ) -> Result<Issue> {
        let ctx = LogContext {
            operation: Operation::MarkdownCreate,
            collection,
            issue_id: None,
            payload: to_payload(&new_issue),
        };
        let precheck = new_issue
            .validate()
            .map_err(|(field, reason)| MutationError::validation(field, reason))
            .and_then(|()| match new_issue.parent.as_deref() {
                Some(parent) if !parent.is_empty() => validate_id(parent),
                _ => Ok(()),
            });
        let this = self;
        let new_issue = &new_issue;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.create_markdown_attempt(collection, new_issue)
            })
            .await?;
        Ok(attempted.value)
    }

    pub async fn get_markdown(&self, collection: &CollectionRef, id: &str) -> Result<Issue> {
        validate_id(id)?;
        let (issue, _) = self.read_markdown(collection, id).await?;
        Ok(issue)
    }

    /// Apply `updates` to the current file content, whatever it is.
    pub async fn update_markdown(
        &self,
        collection: &CollectionRef,
        id: &str,
        updates: IssuePatch,
        cancel: &CancellationToken,
    ) -> Result<MarkdownUpdateOutcome> {
        let ctx = LogContext {
            operation: Operation::MarkdownUpdate,
            collection,
            issue_id: Some(id),
            payload: to_payload(&updates),
        };
        let precheck = validate_id(id).and_then(|()| {
            updates
                .validate()
                .map_err(|(field, reason)| MutationError::validation(field, reason))
        });
        let this = self;
        let updates = &updates;

        let attempted = self
            .run_logged(ctx, precheck, cancel, move |_| {
                this.update_markdown_attempt(collection, id, updates)
            })
            .await?;
        Ok(MarkdownUpdateOutcome {
            issue: attempted.value,
            retry_count: attempted.retry_count,
        })
    }

    async fn create_markdown_attempt(
        &self,
        collection: &CollectionRef,
        new_issue: &NewIssue,
    ) -> Result<Issue> {
        if let Some(parent) = new_issue.parent.as_deref().filter(|p| !p.is_empty())
            && self.store.read(&collection.markdown_path(parent)).await?.is_none()
        {
            return Err(MutationError::validation(
                "parent",
                format!("no issue {parent} in {collection}"),
            ));
        }

        let id = self.fresh_id(|_| false);
        let issue = new_issue.clone().into_issue(id, &now_rfc3339());
        let path = collection.markdown_path(&issue.id);
        self.store
            .write_if_version(
                &path,
                encode(&path, &issue)?,
                None,
                &format!("Create issue {}", issue.id),
            )
            .await?;
        Ok(issue)
    }

    async fn update_markdown_attempt(
        &self,
        collection: &CollectionRef,
        id: &str,
        updates: &IssuePatch,
    ) -> Result<Issue> {
        let (mut issue, version) = self.read_markdown(collection, id).await?;
        let previous = issue.status;
        issue.apply_patch(updates);
        issue.touch(previous, &now_rfc3339());

        let path = collection.markdown_path(id);
        self.store
            .write_if_version(
                &path,
                encode(&path, &issue)?,
                Some(&version),
                &format!("Update issue {id}"),
            )
            .await?;
        Ok(issue)
    }

    async fn read_markdown(&self, collection: &CollectionRef, id: &str) -> Result<(Issue, Version)> {
        let path = collection.markdown_path(id);
        let file = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| MutationError::IssueNotFound { id: id.to_string() })?;
        let text = std::str::from_utf8(&file.bytes).map_err(|e| MutationError::MalformedRecord {
            path: path.clone(),
            reason: format!("invalid UTF-8: {e}"),
        })?;
        let issue = decode_markdown(text).map_err(|e| MutationError::MalformedRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok((issue, file.version))
    }
}

fn encode(path: &str, issue: &Issue) -> Result<Vec<u8>> {
    encode_markdown(issue)
        .map(String::into_bytes)
        .map_err(|e| MutationError::MalformedRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

/// Ids become file names in this layout.
fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(MutationError::validation(
            "id",
            format!("{id:?} is not a valid issue id"),
        ))
    }
}
