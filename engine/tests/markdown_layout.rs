#![allow(clippy::unwrap_used, clippy::expect_used)]
//! The per-file markdown layout over a real directory.

use std::sync::Arc;

use issuevault_engine::{
    CollectionRef, FsStore, IssueEngine, IssuePatch, IssueType, MemorySink, MutationError,
    NewIssue, Operation, Status,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn engine(dir: &TempDir) -> (IssueEngine, Arc<MemorySink>) {
    let log = Arc::new(MemorySink::new());
    let engine = IssueEngine::new(Arc::new(FsStore::new(dir.path())))
        .with_action_log(log.clone())
        .with_id_prefix("md");
    (engine, log)
}

#[tokio::test]
async fn create_get_update_round_trip() {
    let dir = TempDir::new().unwrap();
    let (engine, log) = engine(&dir);
    let collection = CollectionRef::new("tracker");
    let cancel = CancellationToken::new();

    let created = engine
        .create_markdown(
            &collection,
            NewIssue {
                title: "Crash: on save".to_string(),
                description: Some("Steps:\n1. open\n2. save".to_string()),
                issue_type: Some(IssueType::Bug),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(created.id.starts_with("md-"));

    let on_disk = dir
        .path()
        .join("tracker/issues")
        .join(format!("{}.md", created.id));
    let text = std::fs::read_to_string(&on_disk).unwrap();
    assert!(text.starts_with("---\n"));
    assert!(text.contains("type: bug\n"));

    assert_eq!(engine.get_markdown(&collection, &created.id).await.unwrap(), created);

    let updated = engine
        .update_markdown(
            &collection,
            &created.id,
            IssuePatch {
                status: Some(Status::Closed),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(updated.retry_count, 0);
    assert_eq!(updated.issue.status, Status::Closed);
    assert!(updated.issue.closed_at.is_some());
    assert_eq!(updated.issue.description, created.description);

    let operations: Vec<Operation> = log.entries().iter().map(|e| e.operation).collect();
    assert_eq!(
        operations,
        vec![Operation::MarkdownCreate, Operation::MarkdownUpdate]
    );
}

#[tokio::test]
async fn update_overwrites_hand_edits() {
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&dir);
    let collection = CollectionRef::new("tracker");
    let cancel = CancellationToken::new();

    let created = engine
        .create_markdown(
            &collection,
            NewIssue {
                title: "Original".to_string(),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

    // Someone retitles the file by hand; a later update with a stale view
    // still applies its own field on top of the current content.
    let path = dir
        .path()
        .join("tracker/issues")
        .join(format!("{}.md", created.id));
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replace("title: Original", "title: Edited by hand");
    std::fs::write(&path, edited).unwrap();

    let updated = engine
        .update_markdown(
            &collection,
            &created.id,
            IssuePatch {
                priority: Some(1),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(updated.issue.title, "Edited by hand");
    assert_eq!(updated.issue.priority, 1);
}

#[tokio::test]
async fn missing_and_malformed_files() {
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&dir);
    let collection = CollectionRef::new("tracker");

    let err = engine.get_markdown(&collection, "md-none").await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    std::fs::create_dir_all(dir.path().join("tracker/issues")).unwrap();
    std::fs::write(dir.path().join("tracker/issues/md-bad.md"), "no front matter").unwrap();
    let err = engine.get_markdown(&collection, "md-bad").await.unwrap_err();
    assert!(matches!(err, MutationError::MalformedRecord { .. }));

    std::fs::write(
        dir.path().join("tracker/issues/md-latin1.md"),
        b"---\nid: md-latin1\ntitle: caf\xE9\n---\n",
    )
    .unwrap();
    let err = engine.get_markdown(&collection, "md-latin1").await.unwrap_err();
    let MutationError::MalformedRecord { reason, .. } = &err else {
        panic!("expected a malformed record, got {err:?}");
    };
    assert!(reason.starts_with("invalid UTF-8"));

    let err = engine.get_markdown(&collection, "../secret").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn hand_written_yaml_keeps_its_values_through_an_update() {
    let dir = TempDir::new().unwrap();
    let (engine, _) = engine(&dir);
    let collection = CollectionRef::new("tracker");
    std::fs::create_dir_all(dir.path().join("tracker/issues")).unwrap();
    std::fs::write(
        dir.path().join("tracker/issues/md-7.md"),
        concat!(
            "---\n",
            "id: md-7\n",
            "title: Crash # triage later\n",
            "priority: 2 # P2\n",
            "summary: >\n",
            "  Fails when the disk\n",
            "  is full\n",
            "---\n",
            "Seen on CI.\n",
        ),
    )
    .unwrap();

    let updated = engine
        .update_markdown(
            &collection,
            "md-7",
            IssuePatch {
                assignee: Some("ana".to_string()),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(updated.issue.title, "Crash");
    assert_eq!(updated.issue.priority, 2);

    let reread = engine.get_markdown(&collection, "md-7").await.unwrap();
    assert_eq!(reread, updated.issue);
    assert_eq!(reread.assignee.as_deref(), Some("ana"));
    assert_eq!(reread.description.as_deref(), Some("Seen on CI."));
    assert_eq!(
        reread.extra.get("summary"),
        Some(&serde_json::json!("Fails when the disk is full\n"))
    );
}
