use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;

use super::{ContentStore, Result, StoreError, StoredFile, Version, content_version};

/// Lock files live here, relative to the store root.
const LOCK_DIR: &str = ".issuevault/locks";

/// Files under a root directory, typically a repository checkout.
///
/// The compare-and-swap holds an exclusive advisory lock on
/// `.issuevault/locks/<path>.lock` under the root while it re-hashes the
/// current content and swaps in the new bytes through a temp file and
/// rename. Writers that do not take the lock (editors, `git checkout`)
/// are still caught by the hash comparison unless they land between the
/// check and the rename.
///
/// `.issuevault/` belongs in the checkout's `.gitignore`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path onto the filesystem. Only plain relative paths are
    /// accepted.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(StoreError::Rejected {
                path: path.to_string(),
                reason: "path must be relative and stay inside the store root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn read(&self, path: &str) -> Result<Option<StoredFile>> {
        let full = self.resolve(path)?;
        let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| StoreError::Transport(format!("read task failed: {e}")))?
        .map_err(|e| io_error(path, e))?;

        Ok(bytes.map(|bytes| StoredFile {
            version: content_version(&bytes),
            bytes,
        }))
    }

    async fn write_if_version(
        &self,
        path: &str,
        bytes: Vec<u8>,
        expected: Option<&Version>,
        message: &str,
    ) -> Result<Version> {
        let full = self.resolve(path)?;
        let lock = self.root.join(LOCK_DIR).join(format!("{path}.lock"));
        let expected = expected.cloned();
        let owned_path = path.to_string();

        let version = tokio::task::spawn_blocking(move || {
            compare_and_swap(&owned_path, &full, &lock, &bytes, expected.as_ref())
        })
        .await
        .map_err(|e| StoreError::Transport(format!("write task failed: {e}")))??;

        tracing::debug!(path, %version, message, "wrote file");
        Ok(version)
    }
}

fn compare_and_swap(
    path: &str,
    full: &Path,
    lock_path: &Path,
    bytes: &[u8],
    expected: Option<&Version>,
) -> Result<Version> {
    let (Some(dir), Some(name)) = (full.parent(), full.file_name()) else {
        return Err(StoreError::Rejected {
            path: path.to_string(),
            reason: "path has no file name".to_string(),
        });
    };
    let name = name.to_string_lossy();
    std::fs::create_dir_all(dir).map_err(|e| io_error(path, e))?;

    if let Some(lock_dir) = lock_path.parent() {
        std::fs::create_dir_all(lock_dir).map_err(|e| io_error(path, e))?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| io_error(path, e))?;
    // Released when `lock_file` drops.
    lock_file.lock_exclusive().map_err(|e| io_error(path, e))?;

    let current = match std::fs::read(full) {
        Ok(existing) => Some(content_version(&existing)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(io_error(path, e)),
    };
    if current.as_ref() != expected {
        return Err(StoreError::VersionConflict {
            path: path.to_string(),
        });
    }

    let tmp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, bytes).map_err(|e| io_error(path, e))?;
    std::fs::rename(&tmp, full).map_err(|e| io_error(path, e))?;
    Ok(content_version(bytes))
}

fn io_error(path: &str, err: std::io::Error) -> StoreError {
    StoreError::Transport(format!("{path}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        let v1 = store
            .write_if_version(".beads/issues.jsonl", b"one\n".to_vec(), None, "create")
            .await
            .unwrap();
        let read = store.read(".beads/issues.jsonl").await.unwrap().unwrap();

        assert_eq!(read.bytes, b"one\n".to_vec());
        assert_eq!(read.version, v1);
        assert!(!dir.path().join(".beads/.issues.jsonl.tmp").exists());

        let beside: Vec<_> = std::fs::read_dir(dir.path().join(".beads"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(beside, vec![std::ffi::OsString::from("issues.jsonl")]);
        assert!(dir.path().join(".issuevault/locks/.beads/issues.jsonl.lock").exists());
    }

    #[tokio::test]
    async fn external_edit_invalidates_version() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let v1 = store
            .write_if_version("issues.jsonl", b"one\n".to_vec(), None, "create")
            .await
            .unwrap();

        std::fs::write(dir.path().join("issues.jsonl"), b"edited by hand\n").unwrap();

        let err = store
            .write_if_version("issues.jsonl", b"two\n".to_vec(), Some(&v1), "update")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert_eq!(store.read("nope.jsonl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        for path in ["../outside.jsonl", "/etc/passwd", ""] {
            let err = store.read(path).await.unwrap_err();
            assert!(matches!(err, StoreError::Rejected { .. }), "{path}");
        }
    }
}
