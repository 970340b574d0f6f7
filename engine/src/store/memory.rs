use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;

use super::{ContentStore, Result, StoreError, StoredFile, Version, content_version};

/// In-process store. Versions are content hashes, so writing identical
/// bytes yields an identical version.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a file without a version check.
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Version {
        let bytes = bytes.into();
        let version = content_version(&bytes);
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), bytes);
        version
    }

    /// Current bytes of `path`, if any.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<StoredFile>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(path).map(|bytes| StoredFile {
            version: content_version(bytes),
            bytes: bytes.clone(),
        }))
    }

    async fn write_if_version(
        &self,
        path: &str,
        bytes: Vec<u8>,
        expected: Option<&Version>,
        _message: &str,
    ) -> Result<Version> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let current = files.get(path).map(|b| content_version(b));
        if current.as_ref() != expected {
            return Err(StoreError::VersionConflict {
                path: path.to_string(),
            });
        }
        let version = content_version(&bytes);
        files.insert(path.to_string(), bytes);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.read("a.jsonl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_requires_absent_file() {
        let store = MemoryStore::new();
        let v1 = store
            .write_if_version("a.jsonl", b"one\n".to_vec(), None, "create")
            .await
            .unwrap();
        let err = store
            .write_if_version("a.jsonl", b"two\n".to_vec(), None, "create again")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert_eq!(store.read("a.jsonl").await.unwrap().unwrap().version, v1);
    }

    #[tokio::test]
    async fn stale_version_loses_the_race() {
        let store = MemoryStore::new();
        let v1 = store.insert("a.jsonl", b"one\n".to_vec());

        let v2 = store
            .write_if_version("a.jsonl", b"two\n".to_vec(), Some(&v1), "first")
            .await
            .unwrap();
        let err = store
            .write_if_version("a.jsonl", b"three\n".to_vec(), Some(&v1), "second")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { .. }));
        let current = store.read("a.jsonl").await.unwrap().unwrap();
        assert_eq!(current.version, v2);
        assert_eq!(current.bytes, b"two\n".to_vec());
    }
}
