//! Byte representations of the issue collection and the tombstone log.
//!
//! - [`jsonl`]: the primary layout, one JSON object per line.
//! - [`markdown`]: one file per issue with a front matter header. This
//!   layout never takes part in the three-way merge.

pub mod jsonl;
pub mod markdown;

use std::collections::HashMap;

pub use jsonl::{NormalizeError, SkippedEntry, decode, encode, normalize};
pub use markdown::{MarkdownError, decode_markdown, encode_markdown};

use crate::types::{Issue, Tombstone};

/// Ordered, id-keyed view of the primary collection file.
#[derive(Debug, Clone, Default)]
pub struct IssueCollection {
    issues: Vec<Issue>,
    index: HashMap<String, usize>,
    skipped: Vec<SkippedEntry>,
}

impl IssueCollection {
    /// Decode and normalize a JSONL buffer.
    ///
    /// A repeated id replaces the earlier record in place, so the last line
    /// for an id wins while file order is kept.
    pub fn decode(bytes: &[u8]) -> Self {
        let decoded = jsonl::decode(bytes);
        let mut collection = IssueCollection {
            skipped: decoded.skipped,
            ..Default::default()
        };
        for (line, raw) in decoded.objects {
            match jsonl::normalize(&raw) {
                Ok(issue) => collection.upsert(issue),
                Err(e) => {
                    tracing::warn!(line, error = %e, "skipping record");
                    collection.skipped.push(SkippedEntry {
                        line,
                        reason: e.to_string(),
                    });
                }
            }
        }
        collection.skipped.sort_by_key(|s| s.line);
        collection
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        jsonl::encode(&self.issues)
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.index.get(id).map(|&i| &self.issues[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Issue> {
        match self.index.get(id) {
            Some(&i) => self.issues.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert a record, replacing any existing record with the same id.
    pub fn upsert(&mut self, issue: Issue) {
        match self.index.get(&issue.id) {
            Some(&i) => self.issues[i] = issue,
            None => {
                self.index.insert(issue.id.clone(), self.issues.len());
                self.issues.push(issue);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Issue> {
        self.issues.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Lines dropped while decoding.
    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    pub fn into_parts(self) -> (Vec<Issue>, Vec<SkippedEntry>) {
        (self.issues, self.skipped)
    }
}

impl FromIterator<Issue> for IssueCollection {
    fn from_iter<T: IntoIterator<Item = Issue>>(iter: T) -> Self {
        let mut collection = IssueCollection::default();
        for issue in iter {
            collection.upsert(issue);
        }
        collection
    }
}

/// Append-only deletion log.
#[derive(Debug, Clone, Default)]
pub struct TombstoneLog {
    entries: Vec<Tombstone>,
}

impl TombstoneLog {
    pub fn decode(bytes: &[u8]) -> Self {
        let entries = jsonl::decode(bytes)
            .objects
            .iter()
            .filter_map(|(_, raw)| jsonl::normalize_tombstone(raw))
            .collect();
        TombstoneLog { entries }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        jsonl::encode(&self.entries)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|t| t.id == id)
    }

    pub fn push(&mut self, tombstone: Tombstone) {
        self.entries.push(tombstone);
    }

    pub fn entries(&self) -> &[Tombstone] {
        &self.entries
    }
}
