#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]
//! Shared doubles for the engine integration tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use issuevault_engine::codec::IssueCollection;
use issuevault_engine::store::Result as StoreResult;
use issuevault_engine::{
    CollectionRef, ContentStore, Delay, Issue, IssueEngine, MemorySink, MemoryStore, NewIssue,
    StoreError, StoredFile, Version,
};

type WriteHook = Box<dyn FnOnce(&MemoryStore) + Send>;

/// A memory store that can lose races on demand and counts its calls.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    forced_conflicts: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
    before_write: Mutex<Option<WriteHook>>,
    rejection: Mutex<Option<String>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with a version conflict.
    pub fn fail_next_writes(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Refuse the next write outright, as a store without write access would.
    pub fn reject_next_write(&self, reason: &str) {
        *self.rejection.lock().unwrap() = Some(reason.to_string());
    }

    /// Run `hook` against the backing files right before the next write,
    /// as if another writer got there first.
    pub fn before_next_write(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        *self.before_write.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for ScriptedStore {
    async fn read(&self, path: &str) -> StoreResult<Option<StoredFile>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(path).await
    }

    async fn write_if_version(
        &self,
        path: &str,
        bytes: Vec<u8>,
        expected: Option<&Version>,
        message: &str,
    ) -> StoreResult<Version> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let hook = self.before_write.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        let rejection = self.rejection.lock().unwrap().take();
        if let Some(reason) = rejection {
            return Err(StoreError::Rejected {
                path: path.to_string(),
                reason,
            });
        }
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(StoreError::VersionConflict {
                path: path.to_string(),
            });
        }
        self.inner
            .write_if_version(path, bytes, expected, message)
            .await
    }
}

/// Records requested sleeps without sleeping.
#[derive(Default)]
pub struct RecordingDelay {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub struct Harness {
    pub store: Arc<ScriptedStore>,
    pub delay: Arc<RecordingDelay>,
    pub log: Arc<MemorySink>,
    pub engine: IssueEngine,
    pub collection: CollectionRef,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(ScriptedStore::new());
        let delay = Arc::new(RecordingDelay::default());
        let log = Arc::new(MemorySink::new());
        let engine = IssueEngine::new(store.clone())
            .with_delay(delay.clone())
            .with_action_log(log.clone());
        Self {
            store,
            delay,
            log,
            engine,
            collection: CollectionRef::new(".beads"),
        }
    }

    /// Replace the primary collection file with `issues`.
    pub fn seed(&self, issues: Vec<Issue>) {
        let collection: IssueCollection = issues.into_iter().collect();
        self.store
            .inner
            .insert(self.collection.issues_path(), collection.encode().unwrap());
    }

    pub fn seed_raw(&self, text: &str) {
        self.store
            .inner
            .insert(self.collection.issues_path(), text.as_bytes().to_vec());
    }

    pub fn stored(&self) -> IssueCollection {
        let bytes = self
            .store
            .inner
            .contents(&self.collection.issues_path())
            .expect("collection exists");
        IssueCollection::decode(&bytes)
    }

    pub fn stored_issue(&self, id: &str) -> Issue {
        self.stored().get(id).cloned().expect("issue exists")
    }
}

pub fn issue(id: &str, title: &str) -> Issue {
    NewIssue {
        title: title.to_string(),
        ..Default::default()
    }
    .into_issue(id.to_string(), "2026-01-01T00:00:00.000Z")
}

/// Simulate another writer editing one record in place.
pub fn edit_stored(store: &MemoryStore, path: &str, id: &str, edit: impl FnOnce(&mut Issue)) {
    let mut collection = IssueCollection::decode(&store.contents(path).unwrap());
    let issue = collection.get_mut(id).unwrap();
    edit(issue);
    issue.updated_at = "2026-01-09T00:00:00.000Z".to_string();
    store.insert(path, collection.encode().unwrap());
}
