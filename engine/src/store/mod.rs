//! Whole-file content stores with compare-and-swap writes.
//!
//! A store hands out a [`Version`] with every read. A write names the
//! version it builds on and only lands if the file still has that version,
//! so concurrent writers race and exactly one wins.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Opaque token bound to the exact bytes of a file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// File content together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Someone else wrote the file since the expected version was read.
    #[error("version conflict on {path}")]
    VersionConflict { path: String },

    /// The store refused the write for a reason retrying cannot fix.
    #[error("write to {path} rejected: {reason}")]
    Rejected { path: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Read and conditionally overwrite whole files.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    async fn read(&self, path: &str) -> Result<Option<StoredFile>>;

    /// Replace the file at `path` with `bytes` if its current version is
    /// `expected`. `None` means the file must not exist yet.
    async fn write_if_version(
        &self,
        path: &str,
        bytes: Vec<u8>,
        expected: Option<&Version>,
        message: &str,
    ) -> Result<Version>;
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn content_version(bytes: &[u8]) -> Version {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Version(format!("{:x}", hasher.finalize()))
}
