//! Per-issue markdown layout: a `---` delimited YAML front matter
//! followed by the description as free text.
//!
//! ```text
//! ---
//! id: bd-a1b2c3
//! title: "Fix: crash on save"
//! status: open
//! priority: 2
//! type: bug
//! created_at: 2026-01-01T00:00:00.000Z
//! updated_at: 2026-01-01T00:00:00.000Z
//! ---
//! Steps to reproduce...
//! ```
//!
//! Comments are not represented in this layout.

use serde_json::{Map, Value};
use serde_yaml::{Mapping, Value as YamlValue};

use super::jsonl::{NormalizeError, normalize};
use crate::types::Issue;

const FENCE: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkdownError {
    #[error("missing front matter")]
    MissingFrontMatter,
    #[error("unterminated front matter")]
    Unterminated,
    #[error("front matter must be a YAML mapping: {0}")]
    InvalidFrontMatter(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

pub fn encode_markdown(issue: &Issue) -> Result<String, MarkdownError> {
    let mut header = Mapping::new();
    insert_text(&mut header, "id", &issue.id);
    insert_text(&mut header, "title", &issue.title);
    insert_text(&mut header, "status", issue.status.as_str());
    header.insert(
        YamlValue::from("priority"),
        YamlValue::from(issue.priority),
    );
    insert_text(&mut header, "type", issue.issue_type.as_str());
    if let Some(assignee) = &issue.assignee {
        insert_text(&mut header, "assignee", assignee);
    }
    if let Some(parent) = &issue.parent {
        insert_text(&mut header, "parent", parent);
    }
    insert_text(&mut header, "created_at", &issue.created_at);
    insert_text(&mut header, "updated_at", &issue.updated_at);
    if let Some(closed_at) = &issue.closed_at {
        insert_text(&mut header, "closed_at", closed_at);
    }
    for (key, value) in &issue.extra {
        let value = serde_yaml::to_value(value)
            .map_err(|e| MarkdownError::InvalidFrontMatter(format!("{key}: {e}")))?;
        header.insert(YamlValue::from(key.as_str()), value);
    }
    let header = serde_yaml::to_string(&header)
        .map_err(|e| MarkdownError::InvalidFrontMatter(e.to_string()))?;

    let mut out = String::new();
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&header);
    out.push_str(FENCE);
    out.push('\n');
    if let Some(description) = &issue.description {
        out.push_str(description);
        out.push('\n');
    }
    Ok(out)
}

pub fn decode_markdown(text: &str) -> Result<Issue, MarkdownError> {
    let (header, body) = split_front_matter(text)?;

    let mapping: Mapping = if header.trim().is_empty() {
        Mapping::new()
    } else {
        serde_yaml::from_str(header).map_err(|e| MarkdownError::InvalidFrontMatter(e.to_string()))?
    };
    let mut raw = Map::new();
    for (key, value) in mapping {
        let key = scalar_key(&key).ok_or_else(|| {
            MarkdownError::InvalidFrontMatter(format!("key {key:?} is not a scalar"))
        })?;
        let value = serde_json::to_value(&value)
            .map_err(|e| MarkdownError::InvalidFrontMatter(format!("{key}: {e}")))?;
        raw.insert(key, value);
    }

    let body = body.strip_suffix('\n').unwrap_or(body);
    if !body.is_empty() {
        raw.insert("description".to_string(), Value::String(body.to_string()));
    }

    Ok(normalize(&raw)?)
}

/// Split `text` into the YAML between the `---` fences and the body after.
fn split_front_matter(text: &str) -> Result<(&str, &str), MarkdownError> {
    let mut lines = text.split_inclusive('\n');
    let header_start = match lines.next() {
        Some(first) if first.trim_end() == FENCE => first.len(),
        _ => return Err(MarkdownError::MissingFrontMatter),
    };

    let mut offset = header_start;
    for line in lines {
        if line.trim_end() == FENCE {
            let header = &text[header_start..offset];
            let body = &text[offset + line.len()..];
            return Ok((header, body));
        }
        offset += line.len();
    }
    Err(MarkdownError::Unterminated)
}

fn insert_text(header: &mut Mapping, key: &str, value: &str) {
    header.insert(YamlValue::from(key), YamlValue::from(value));
}

fn scalar_key(key: &YamlValue) -> Option<String> {
    match key {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
