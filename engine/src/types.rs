//! Issue records and the editable-field vocabulary.
//!
//! Records live as JSON objects in a shared file that other tools also
//! write, so every type here is tolerant on the way in (see
//! [`crate::codec`]) and keeps keys it does not understand in
//! [`Issue::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lowest accepted priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 5;
/// Priority applied when a record does not carry one.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Lifecycle status of an issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Closed => "closed",
        }
    }

    /// Lenient parse used for externally-authored data.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Status::Open),
            "in_progress" | "in-progress" | "inprogress" => Some(Status::InProgress),
            "closed" => Some(Status::Closed),
            _ => None,
        }
    }
}

/// Kind of work an issue tracks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    #[default]
    Task,
    Epic,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Feature => "feature",
            IssueType::Task => "task",
            IssueType::Epic => "epic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bug" => Some(IssueType::Bug),
            "feature" => Some(IssueType::Feature),
            "task" => Some(IssueType::Task),
            "epic" => Some(IssueType::Epic),
            _ => None,
        }
    }
}

/// A comment attached to an issue. Ids are unique per issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    pub created_at: String,
}

/// A work item as stored in the primary collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, alias = "type")]
    pub issue_type: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    /// Keys written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Issue {
    /// Current value of an editable field, in comparable form.
    pub fn field_value(&self, field: EditableField) -> FieldValue {
        match field {
            EditableField::Title => FieldValue::text(Some(&self.title)),
            EditableField::Description => FieldValue::text(self.description.as_deref()),
            EditableField::Status => FieldValue::Status(self.status),
            EditableField::Priority => FieldValue::Priority(self.priority),
            EditableField::IssueType => FieldValue::IssueType(self.issue_type),
            EditableField::Assignee => FieldValue::text(self.assignee.as_deref()),
        }
    }

    /// Copy `field` from `patch` onto this record. No-op when the patch does
    /// not touch the field.
    pub fn apply_patch_field(&mut self, patch: &IssuePatch, field: EditableField) {
        match field {
            EditableField::Title => {
                if let Some(title) = &patch.title {
                    self.title = title.clone();
                }
            }
            EditableField::Description => {
                if let Some(description) = &patch.description {
                    self.description = non_empty(description);
                }
            }
            EditableField::Status => {
                if let Some(status) = patch.status {
                    self.status = status;
                }
            }
            EditableField::Priority => {
                if let Some(priority) = patch.priority {
                    self.priority = priority;
                }
            }
            EditableField::IssueType => {
                if let Some(issue_type) = patch.issue_type {
                    self.issue_type = issue_type;
                }
            }
            EditableField::Assignee => {
                if let Some(assignee) = &patch.assignee {
                    self.assignee = non_empty(assignee);
                }
            }
        }
    }

    /// Apply every field the patch touches.
    pub fn apply_patch(&mut self, patch: &IssuePatch) {
        for field in patch.touched_fields() {
            self.apply_patch_field(patch, field);
        }
    }

    /// Stamp `updated_at` and keep `closed_at` in step with a status change
    /// from `previous`.
    pub fn touch(&mut self, previous: Status, now: &str) {
        self.updated_at = now.to_string();
        match (previous, self.status) {
            (Status::Closed, Status::Closed) => {}
            (_, Status::Closed) => self.closed_at = Some(now.to_string()),
            (Status::Closed, _) => self.closed_at = None,
            _ => {}
        }
    }

    /// Next comment id: one past the largest id in use.
    pub fn next_comment_id(&self) -> u64 {
        self.comments.iter().map(|c| c.id).max().unwrap_or(0) + 1
    }
}

pub(crate) fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Fields a caller may edit through an update. Everything else on an issue
/// is owned by the system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    Title,
    Description,
    Status,
    Priority,
    #[serde(rename = "type")]
    IssueType,
    Assignee,
}

impl EditableField {
    pub const ALL: [EditableField; 6] = [
        EditableField::Title,
        EditableField::Description,
        EditableField::Status,
        EditableField::Priority,
        EditableField::IssueType,
        EditableField::Assignee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EditableField::Title => "title",
            EditableField::Description => "description",
            EditableField::Status => "status",
            EditableField::Priority => "priority",
            EditableField::IssueType => "type",
            EditableField::Assignee => "assignee",
        }
    }
}

/// Comparable value of one editable field.
///
/// Text values are normalized so that an empty string and an absent value
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(Option<String>),
    Status(Status),
    Priority(u8),
    IssueType(IssueType),
}

impl FieldValue {
    pub fn text(value: Option<&str>) -> Self {
        FieldValue::Text(value.and_then(non_empty))
    }
}

/// A partial update: only the fields a caller touched are `Some`.
///
/// An empty string on `description` or `assignee` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(
        default,
        rename = "type",
        alias = "issue_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl IssuePatch {
    /// Value this patch sets for `field`, if it touches it.
    pub fn field_value(&self, field: EditableField) -> Option<FieldValue> {
        match field {
            EditableField::Title => self.title.as_deref().map(|t| FieldValue::text(Some(t))),
            EditableField::Description => {
                self.description.as_deref().map(|d| FieldValue::text(Some(d)))
            }
            EditableField::Status => self.status.map(FieldValue::Status),
            EditableField::Priority => self.priority.map(FieldValue::Priority),
            EditableField::IssueType => self.issue_type.map(FieldValue::IssueType),
            EditableField::Assignee => self.assignee.as_deref().map(|a| FieldValue::text(Some(a))),
        }
    }

    /// Touched fields in canonical order.
    pub fn touched_fields(&self) -> Vec<EditableField> {
        EditableField::ALL
            .into_iter()
            .filter(|f| self.field_value(*f).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    /// Reject values no record may hold. Returns `(field, reason)`.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(("title", "must not be empty".to_string()));
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_priority(priority: u8) -> Result<(), (&'static str, String)> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err((
            "priority",
            format!("must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"),
        ))
    }
}

/// Fields accepted when creating an issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(
        default,
        rename = "type",
        alias = "issue_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl NewIssue {
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if self.title.trim().is_empty() {
            return Err(("title", "must not be empty".to_string()));
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        Ok(())
    }

    /// Materialize the record under a freshly assigned id.
    pub fn into_issue(self, id: String, now: &str) -> Issue {
        let status = self.status.unwrap_or_default();
        Issue {
            id,
            title: self.title,
            description: self.description.as_deref().and_then(non_empty),
            status,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            issue_type: self.issue_type.unwrap_or_default(),
            assignee: self.assignee.as_deref().and_then(non_empty),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            closed_at: (status == Status::Closed).then(|| now.to_string()),
            parent: self.parent.as_deref().and_then(non_empty),
            comments: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// One entry of the append-only deletion log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: String,
}

/// Directory in the store holding one issue collection.
///
/// ```text
/// <dir>/issues.jsonl      primary collection
/// <dir>/deletions.jsonl   tombstone log
/// <dir>/issues/<id>.md    markdown layout
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    dir: String,
}

impl CollectionRef {
    pub fn new(dir: impl Into<String>) -> Self {
        let dir: String = dir.into();
        Self {
            dir: dir.trim_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn issues_path(&self) -> String {
        self.join("issues.jsonl")
    }

    pub fn tombstones_path(&self) -> String {
        self.join("deletions.jsonl")
    }

    pub fn markdown_path(&self, id: &str) -> String {
        self.join(&format!("issues/{id}.md"))
    }

    fn join(&self, name: &str) -> String {
        if self.dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.dir)
        }
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir)
    }
}
