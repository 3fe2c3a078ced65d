//! Approval Guard - protected-file write approvals
//!
//! Classifies write targets as forbidden, protected or free, and keeps a
//! durable queue of human approvals for protected-path writes.
//!
//! The file is the source of truth, since the CLI and a running loop may both
//! hold a guard on it. Every operation re-reads it under one async lock. A
//! mutation is applied to a copy of the set, the copy is persisted, and only
//! then does it replace the in-memory set. A failed write leaves memory and
//! disk as they were.
//!
//! Applying an approved write is not the guard's job; it only records the
//! decision.

pub mod path;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ApprovalSettings;
use crate::error::{ApprovalError, Result};
use store::ApprovalStore;

pub use path::{GuardPath, PathMatcher, PathRule};

/// Review state of a queued write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Denied,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// A queued write awaiting human decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// 8 hex chars, unique within the set
    pub id: String,
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl PendingApproval {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// Guard over protected and forbidden paths
pub struct ApprovalGuard {
    entries: Mutex<Vec<PendingApproval>>,
    store: ApprovalStore,
    protected: PathMatcher,
    forbidden: PathMatcher,
}

impl ApprovalGuard {
    /// Open the approval file at `path` with the default rule sets
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_rules(
            path,
            PathMatcher::default_protected(),
            PathMatcher::default_forbidden(),
        )
    }

    pub fn open_with_rules(
        path: impl Into<PathBuf>,
        protected: PathMatcher,
        forbidden: PathMatcher,
    ) -> Result<Self> {
        let store = ApprovalStore::new(path);
        let entries = store.load()?;
        tracing::info!(
            path = %store.path().display(),
            loaded = entries.len(),
            pending = entries.iter().filter(|e| e.is_pending()).count(),
            "approval guard ready"
        );
        Ok(Self {
            entries: Mutex::new(entries),
            store,
            protected,
            forbidden,
        })
    }

    /// Open using configured rule lists, falling back to the defaults.
    /// `file` is the already-resolved approval file path.
    pub fn from_settings(settings: &ApprovalSettings, file: impl Into<PathBuf>) -> Result<Self> {
        let protected = match &settings.protected {
            Some(patterns) => PathMatcher::from_patterns(patterns)?,
            None => PathMatcher::default_protected(),
        };
        let forbidden = match &settings.forbidden {
            Some(patterns) => PathMatcher::from_patterns(patterns)?,
            None => PathMatcher::default_forbidden(),
        };
        Self::open_with_rules(file, protected, forbidden)
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Never writable. Paths that fail to normalise count as forbidden.
    pub fn is_forbidden(&self, path: &str) -> bool {
        match GuardPath::parse(path) {
            Ok(p) => self.forbidden.matches(&p),
            Err(_) => true,
        }
    }

    /// Writable only through an approval
    pub fn is_protected(&self, path: &str) -> bool {
        GuardPath::parse(path)
            .map(|p| self.protected.matches(&p))
            .unwrap_or(false)
    }

    /// Queue a write for review. Duplicate requests for one path are kept
    /// as separate entries. Forbidden paths are refused.
    pub async fn request_approval(
        &self,
        file_path: &str,
        content: &str,
        reason: &str,
    ) -> Result<PendingApproval> {
        if self.is_forbidden(file_path) {
            return Err(ApprovalError::Forbidden(file_path.to_string()).into());
        }
        let mut entries = self.entries.lock().await;
        self.refresh(&mut entries)?;

        let mut id = short_id();
        while entries.iter().any(|e| e.id == id) {
            id = short_id();
        }
        let approval = PendingApproval {
            id,
            file_path: file_path.to_string(),
            content: content.to_string(),
            reason: reason.to_string(),
            requested_at: Utc::now(),
            status: ApprovalStatus::Pending,
            reviewed_at: None,
        };

        let mut next = entries.clone();
        next.push(approval.clone());
        self.store.save(&next)?;
        *entries = next;

        tracing::info!(approval_id = %approval.id, file = %approval.file_path, "approval requested");
        Ok(approval)
    }

    pub async fn approve(&self, id: &str) -> Result<Option<PendingApproval>> {
        self.resolve(id, ApprovalStatus::Approved).await
    }

    pub async fn deny(&self, id: &str) -> Result<Option<PendingApproval>> {
        self.resolve(id, ApprovalStatus::Denied).await
    }

    /// `None` when the id is unknown or already resolved
    async fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<Option<PendingApproval>> {
        let mut entries = self.entries.lock().await;
        self.refresh(&mut entries)?;
        let Some(index) = entries.iter().position(|e| e.id == id && e.is_pending()) else {
            tracing::debug!(approval_id = %id, %status, "no pending approval with this id");
            return Ok(None);
        };

        let mut next = entries.clone();
        next[index].status = status;
        next[index].reviewed_at = Some(Utc::now());
        let resolved = next[index].clone();
        self.store.save(&next)?;
        *entries = next;

        tracing::info!(approval_id = %id, file = %resolved.file_path, %status, "approval resolved");
        Ok(Some(resolved))
    }

    pub async fn get(&self, id: &str) -> Option<PendingApproval> {
        self.snapshot().await.into_iter().find(|e| e.id == id)
    }

    pub async fn list_pending(&self) -> Vec<PendingApproval> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|e| e.is_pending())
            .collect()
    }

    /// Every entry in request order
    pub async fn list_all(&self) -> Vec<PendingApproval> {
        self.snapshot().await
    }

    /// Drop approved and denied entries, returning how many were removed
    pub async fn clear_resolved(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        self.refresh(&mut entries)?;
        let next: Vec<PendingApproval> = entries.iter().filter(|e| e.is_pending()).cloned().collect();
        let removed = entries.len() - next.len();
        self.store.save(&next)?;
        *entries = next;

        tracing::info!(removed, "resolved approvals cleared");
        Ok(removed)
    }

    fn refresh(&self, entries: &mut Vec<PendingApproval>) -> Result<()> {
        *entries = self.store.load()?;
        Ok(())
    }

    /// Current set; the last known copy if the file cannot be read
    async fn snapshot(&self) -> Vec<PendingApproval> {
        let mut entries = self.entries.lock().await;
        if let Err(e) = self.refresh(&mut entries) {
            tracing::warn!(error = %e, path = %self.store.path().display(), "reload failed, serving cached approvals");
        }
        entries.clone()
    }
}

impl fmt::Debug for ApprovalGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalGuard")
            .field("store", &self.store.path())
            .field("protected_rules", &self.protected.rules().len())
            .field("forbidden_rules", &self.forbidden.rules().len())
            .finish()
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
