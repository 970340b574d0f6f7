//! JSON Lines decoding and record normalization.
//!
//! The primary collection is one JSON object per line. Lines that are not
//! objects are skipped and reported rather than failing the whole file.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{
    Comment, DEFAULT_PRIORITY, Issue, IssueType, MAX_PRIORITY, MIN_PRIORITY, Status, Tombstone,
    non_empty,
};

/// Timestamp used when a record carries neither `created_at` nor `updated_at`.
pub const UNKNOWN_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

/// Keys [`normalize`] consumes; everything else lands in [`Issue::extra`].
const KNOWN_KEYS: &[&str] = &[
    "id",
    "title",
    "description",
    "status",
    "priority",
    "issue_type",
    "type",
    "assignee",
    "created_at",
    "updated_at",
    "closed_at",
    "parent",
    "comments",
];

/// A line that did not survive decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// Raw objects in file order plus whatever had to be dropped.
#[derive(Debug, Default)]
pub struct Decoded {
    pub objects: Vec<(usize, Map<String, Value>)>,
    pub skipped: Vec<SkippedEntry>,
}

/// Split a JSONL buffer into loosely-typed objects.
pub fn decode(bytes: &[u8]) -> Decoded {
    let mut decoded = Decoded::default();

    for (index, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_no = index + 1;
        let line = match std::str::from_utf8(raw_line) {
            Ok(line) => line,
            Err(e) => {
                decoded.skipped.push(SkippedEntry {
                    line: line_no,
                    reason: format!("invalid UTF-8: {e}"),
                });
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => decoded.objects.push((line_no, map)),
            Ok(other) => decoded.skipped.push(SkippedEntry {
                line: line_no,
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => decoded.skipped.push(SkippedEntry {
                line: line_no,
                reason: format!("invalid JSON: {e}"),
            }),
        }
    }

    for entry in &decoded.skipped {
        tracing::warn!(line = entry.line, reason = %entry.reason, "skipping malformed line");
    }
    decoded
}

/// Encode records as compact JSON, one per line.
pub fn encode<T: Serialize>(records: &[T]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Why a raw object could not become an [`Issue`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("record has no id")]
    MissingId,
}

/// Turn a raw object into a typed issue, applying defaults and coercions.
pub fn normalize(raw: &Map<String, Value>) -> Result<Issue, NormalizeError> {
    let id = raw
        .get("id")
        .and_then(coerce_string)
        .and_then(|s| non_empty(s.trim()))
        .ok_or(NormalizeError::MissingId)?;

    let status = raw
        .get("status")
        .and_then(Value::as_str)
        .and_then(Status::parse)
        .unwrap_or_default();

    let issue_type = raw
        .get("issue_type")
        .or_else(|| raw.get("type"))
        .and_then(Value::as_str)
        .and_then(IssueType::parse)
        .unwrap_or_default();

    let created = raw.get("created_at").and_then(coerce_string);
    let updated = raw.get("updated_at").and_then(coerce_string);
    let created_at = created
        .clone()
        .or_else(|| updated.clone())
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());
    let updated_at = updated.unwrap_or_else(|| created_at.clone());

    let comments = match raw.get("comments") {
        Some(Value::Array(items)) => items.iter().filter_map(normalize_comment).collect(),
        _ => Vec::new(),
    };

    let mut extra = Map::new();
    for (key, value) in raw {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            extra.insert(key.clone(), value.clone());
        }
    }
    // Both spellings present: `issue_type` wins, `type` is carried as-is.
    if raw.contains_key("issue_type")
        && let Some(legacy) = raw.get("type")
    {
        extra.insert("type".to_string(), legacy.clone());
    }

    Ok(Issue {
        id,
        title: raw.get("title").and_then(coerce_string).unwrap_or_default(),
        description: optional_text(raw.get("description")),
        status,
        priority: raw
            .get("priority")
            .and_then(coerce_priority)
            .unwrap_or(DEFAULT_PRIORITY),
        issue_type,
        assignee: optional_text(raw.get("assignee")),
        created_at,
        updated_at,
        closed_at: optional_text(raw.get("closed_at")),
        parent: optional_text(raw.get("parent")),
        comments,
        extra,
    })
}

/// Normalize a tombstone line; entries without an id are dropped.
pub fn normalize_tombstone(raw: &Map<String, Value>) -> Option<Tombstone> {
    let id = raw
        .get("id")
        .and_then(coerce_string)
        .and_then(|s| non_empty(s.trim()))?;
    let deleted_at = raw
        .get("deleted_at")
        .and_then(coerce_string)
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());
    Some(Tombstone { id, deleted_at })
}

fn normalize_comment(raw: &Value) -> Option<Comment> {
    let obj = raw.as_object()?;
    let id = obj.get("id").and_then(coerce_u64)?;
    Some(Comment {
        id,
        author: optional_text(obj.get("author")),
        text: obj.get("text").and_then(coerce_string).unwrap_or_default(),
        created_at: obj
            .get("created_at")
            .and_then(coerce_string)
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string()),
    })
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    value.and_then(coerce_string).and_then(|s| non_empty(&s))
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `2`, `2.0`, `"2"` and `"P2"`; clamps into range.
fn coerce_priority(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))?,
        Value::String(s) => {
            let s = s.trim();
            let s = s.strip_prefix(['p', 'P']).unwrap_or(s);
            s.parse::<i64>().ok()?
        }
        _ => return None,
    };
    let clamped = raw.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY));
    u8::try_from(clamped).ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn decode_skips_malformed_lines() {
        let input = b"{\"id\":\"a\"}\nnot json\n\n[1,2]\n{\"id\":\"b\"}\n";
        let decoded = decode(input);
        assert_eq!(decoded.objects.len(), 2);
        assert_eq!(decoded.objects[1].0, 5);
        let lines: Vec<usize> = decoded.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![2, 4]);
        assert!(decoded.skipped[1].reason.contains("array"));
    }

    #[test]
    fn decode_skips_lines_with_invalid_utf8() {
        let input = b"{\"id\":\"bd-1\",\"title\":\"caf\xE9\"}\r\n{\"id\":\"bd-2\",\"title\":\"caf\xC3\xA9\"}\n";
        let decoded = decode(input);
        assert_eq!(decoded.objects.len(), 1);
        assert_eq!(decoded.objects[0].0, 2);
        assert_eq!(decoded.objects[0].1["title"], json!("café"));
        assert_eq!(decoded.skipped.len(), 1);
        assert_eq!(decoded.skipped[0].line, 1);
        assert!(decoded.skipped[0].reason.starts_with("invalid UTF-8"));
    }

    #[test]
    fn normalize_applies_defaults() {
        let issue = normalize(&object(json!({"id": "bd-1"}))).unwrap();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.priority, 3);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.title, "");
        assert_eq!(issue.created_at, UNKNOWN_TIMESTAMP);
    }

    #[test]
    fn normalize_coerces_legacy_shapes() {
        let issue = normalize(&object(json!({
            "id": 42,
            "priority": "P1",
            "type": "bug",
            "status": "in-progress",
            "assignee": "",
            "updated_at": "2026-01-02T00:00:00Z",
            "comments": [{"id": "3", "text": "hi"}, {"text": "no id"}, "junk"],
            "labels": ["ui"]
        })))
        .unwrap();
        assert_eq!(issue.id, "42");
        assert_eq!(issue.priority, 1);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.assignee, None);
        assert_eq!(issue.created_at, "2026-01-02T00:00:00Z");
        assert_eq!(issue.comments.len(), 1);
        assert_eq!(issue.comments[0].id, 3);
        assert_eq!(issue.extra.get("labels"), Some(&json!(["ui"])));
    }

    #[test]
    fn normalize_clamps_priority() {
        let high = normalize(&object(json!({"id": "a", "priority": 9}))).unwrap();
        let low = normalize(&object(json!({"id": "b", "priority": -2}))).unwrap();
        assert_eq!(high.priority, 5);
        assert_eq!(low.priority, 1);
    }

    #[test]
    fn normalize_requires_id() {
        assert_eq!(
            normalize(&object(json!({"title": "x"}))),
            Err(NormalizeError::MissingId)
        );
        assert_eq!(
            normalize(&object(json!({"id": "  "}))),
            Err(NormalizeError::MissingId)
        );
    }
}
