//! Approval queue durability across restarts, and the write tool in front
//! of it

use foundry_core::guard::{ApprovalGuard, ApprovalStatus};
use foundry_core::tools::{WriteOutcome, WriteTool};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn decisions_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("state").join("approvals.json");

    let (approved, denied, pending) = {
        let guard = ApprovalGuard::open(&file).unwrap();
        let a = guard.request_approval("Cargo.toml", "a", "bump").await.unwrap();
        let b = guard.request_approval("src/main.rs", "b", "rewrite").await.unwrap();
        let c = guard.request_approval("README.md", "c", "docs").await.unwrap();
        guard.approve(&a.id).await.unwrap();
        guard.deny(&b.id).await.unwrap();
        (a.id, b.id, c.id)
    };

    let reopened = ApprovalGuard::open(&file).unwrap();
    let all = reopened.list_all().await;
    assert_eq!(all.len(), 3);

    let status_of = |id: &str| all.iter().find(|e| e.id == id).map(|e| e.status);
    assert_eq!(status_of(&approved), Some(ApprovalStatus::Approved));
    assert_eq!(status_of(&denied), Some(ApprovalStatus::Denied));
    assert_eq!(status_of(&pending), Some(ApprovalStatus::Pending));

    let entry = reopened.get(&denied).await.unwrap();
    assert_eq!(entry.file_path, "src/main.rs");
    assert_eq!(entry.reason, "rewrite");
    assert!(entry.reviewed_at.is_some());

    let queue: Vec<_> = reopened.list_pending().await.into_iter().map(|e| e.id).collect();
    assert_eq!(queue, vec![pending]);
}

#[tokio::test]
async fn reopening_without_changes_is_stable() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("approvals.json");

    {
        let guard = ApprovalGuard::open(&file).unwrap();
        let entry = guard.request_approval("Dockerfile", "FROM scratch", "").await.unwrap();
        guard.approve(&entry.id).await.unwrap();
    }

    let first = ApprovalGuard::open(&file).unwrap().list_all().await;
    let second = ApprovalGuard::open(&file).unwrap().list_all().await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn cleared_entries_stay_cleared() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("approvals.json");

    {
        let guard = ApprovalGuard::open(&file).unwrap();
        let a = guard.request_approval("Cargo.toml", "a", "").await.unwrap();
        guard.request_approval("Cargo.lock", "b", "").await.unwrap();
        guard.deny(&a.id).await.unwrap();
        assert_eq!(guard.clear_resolved().await.unwrap(), 1);
    }

    let reopened = ApprovalGuard::open(&file).unwrap();
    let all = reopened.list_all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].file_path, "Cargo.lock");
}

#[tokio::test]
async fn decisions_from_another_guard_are_kept() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("approvals.json");

    // One guard held by the running loop, one opened by a reviewer
    let running = ApprovalGuard::open(&file).unwrap();
    let reviewer = ApprovalGuard::open(&file).unwrap();

    let first = running.request_approval("backend/api.py", "a", "").await.unwrap();
    let approved = reviewer.approve(&first.id).await.unwrap().unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);

    assert_eq!(
        running.get(&first.id).await.unwrap().status,
        ApprovalStatus::Approved
    );
    let second = running.request_approval("backend/main.py", "b", "").await.unwrap();
    assert!(running.approve(&first.id).await.unwrap().is_none());

    let reopened = ApprovalGuard::open(&file).unwrap();
    let all = reopened.list_all().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].status, ApprovalStatus::Approved);
    assert_eq!(all[1].id, second.id);
    assert!(all[1].is_pending());

    assert_eq!(reviewer.clear_resolved().await.unwrap(), 1);
    assert_eq!(running.list_pending().await.len(), 1);
    assert_eq!(running.list_all().await.len(), 1);
}

#[tokio::test]
async fn protected_writes_queue_and_free_writes_land() {
    let dir = TempDir::new().unwrap();
    let guard = Arc::new(ApprovalGuard::open(dir.path().join(".foundry/approvals.json")).unwrap());
    let tool = WriteTool::new(dir.path(), guard.clone());

    let outcome = tool.write("backend/main.py", "app = 1\n").await.unwrap();
    let WriteOutcome::QueuedForApproval { id, .. } = &outcome else {
        panic!("expected the write to be queued, got {outcome:?}");
    };
    assert!(!dir.path().join("backend/main.py").exists());

    let queued = guard.get(id).await.unwrap();
    assert_eq!(queued.content, "app = 1\n");
    assert!(queued.reason.contains("backend/main.py"));

    let outcome = tool.write(".env", "SECRET=1").await.unwrap();
    assert!(matches!(outcome, WriteOutcome::BlockedForbidden { .. }));
    assert_eq!(guard.list_all().await.len(), 1);

    let outcome = tool.write("backend/feature.py", "x = 1\n").await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Written { .. }));
    assert_eq!(tool.read("backend/feature.py").await.unwrap(), "x = 1\n");
}
