//! Field-level three-way merge for a single issue.
//!
//! `merge` is pure: it never touches the store and never stamps
//! timestamps. The caller decides whether the result may be written.

use serde::Serialize;

use crate::types::{EditableField, FieldValue, Issue, IssuePatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Local edits applied cleanly.
    Success,
    /// No conflicts, but at least one touched field kept the remote value.
    AutoMerged,
    /// At least one field was edited on both sides to different values.
    Conflict,
}

/// A field both sides changed to different values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: EditableField,
    pub base_value: FieldValue,
    pub local_value: FieldValue,
    pub remote_value: FieldValue,
    pub remote_updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub status: MergeStatus,
    /// For [`MergeStatus::Conflict`] this is a best-effort partial merge for
    /// display; it must never be written.
    pub merged_issue: Issue,
    pub auto_merged_fields: Vec<EditableField>,
    pub conflicts: Vec<FieldConflict>,
}

impl MergeResult {
    pub fn is_conflict(&self) -> bool {
        self.status == MergeStatus::Conflict
    }
}

/// Merge the caller's patch (`local`) onto the freshly read `remote`,
/// using `base` (what the caller saw before editing) to tell who changed
/// what. Without a base the patch simply wins.
pub fn merge(base: Option<&Issue>, local: &IssuePatch, remote: &Issue) -> MergeResult {
    let mut merged = remote.clone();

    let Some(base) = base else {
        merged.apply_patch(local);
        return MergeResult {
            status: MergeStatus::Success,
            merged_issue: merged,
            auto_merged_fields: Vec::new(),
            conflicts: Vec::new(),
        };
    };

    let mut auto_merged_fields = Vec::new();
    let mut conflicts = Vec::new();

    for field in EditableField::ALL {
        let Some(local_value) = local.field_value(field) else {
            continue;
        };
        let base_value = base.field_value(field);
        let remote_value = remote.field_value(field);

        let remote_changed = remote_value != base_value;
        let local_changed = local_value != base_value;

        if !remote_changed {
            merged.apply_patch_field(local, field);
        } else if !local_changed {
            auto_merged_fields.push(field);
        } else if local_value == remote_value {
            merged.apply_patch_field(local, field);
        } else {
            conflicts.push(FieldConflict {
                field,
                base_value,
                local_value,
                remote_value,
                remote_updated_at: remote.updated_at.clone(),
            });
        }
    }

    let status = if !conflicts.is_empty() {
        MergeStatus::Conflict
    } else if !auto_merged_fields.is_empty() {
        MergeStatus::AutoMerged
    } else {
        MergeStatus::Success
    };

    MergeResult {
        status,
        merged_issue: merged,
        auto_merged_fields,
        conflicts,
    }
}
