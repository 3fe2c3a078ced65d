//! Version-control publishing: commit, tag with the next patch version, push

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{FoundryError, Result};

/// First tag of a repository with no parseable tags
pub const INITIAL_VERSION: &str = "v0.0.1";

/// Source-control operations used by the publisher
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Most recent tag, `None` when the repository has none
    async fn latest_tag(&self) -> Result<Option<String>>;

    /// Stage everything and commit
    async fn commit_all(&self, message: &str) -> Result<()>;

    async fn tag(&self, tag: &str) -> Result<()>;

    /// Push commits and tags
    async fn push(&self) -> Result<()>;
}

/// Bump the patch component: `v1.2.3` → `v1.2.4`.
///
/// Anything missing or not of the form `[v]MAJOR.MINOR.PATCH` starts over
/// at [`INITIAL_VERSION`].
pub fn next_version(latest: Option<&str>) -> String {
    let parsed = latest.and_then(|tag| {
        let mut parts = tag.trim().trim_start_matches('v').split('.');
        let major = parts.next()?.parse::<u64>().ok()?;
        let minor = parts.next()?.parse::<u64>().ok()?;
        let patch = parts.next()?.parse::<u64>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((major, minor, patch.checked_add(1)?))
    });

    match parsed {
        Some((major, minor, patch)) => format!("v{major}.{minor}.{patch}"),
        None => INITIAL_VERSION.to_string(),
    }
}

/// Commits and tags accepted candidates.
///
/// Publishes are serialised, so concurrently accepted candidates get
/// distinct, increasing tags.
pub struct VersionControlPublisher {
    scm: Arc<dyn SourceControl>,
    push: bool,
    lock: Mutex<()>,
}

impl VersionControlPublisher {
    pub fn new(scm: Arc<dyn SourceControl>) -> Self {
        Self {
            scm,
            push: true,
            lock: Mutex::new(()),
        }
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// Commit, tag and optionally push; returns the new tag
    pub async fn publish(&self, message: &str) -> Result<String> {
        let _guard = self.lock.lock().await;

        let latest = self.scm.latest_tag().await?;
        let version = next_version(latest.as_deref());

        self.scm.commit_all(message).await?;
        self.scm.tag(&version).await?;
        if self.push {
            self.scm.push().await?;
        }

        tracing::info!(tag = %version, previous = ?latest, "published");
        Ok(version)
    }

    /// [`publish`](Self::publish) reduced to success or failure
    pub async fn commit_and_tag(&self, message: &str) -> bool {
        match self.publish(message).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "publish failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for VersionControlPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionControlPublisher")
            .field("push", &self.push)
            .finish()
    }
}

/// `git` executed in a working copy
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|e| FoundryError::SourceControl(format!("git {}: {e}", args.join(" "))))
    }

    async fn git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(FoundryError::SourceControl(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn latest_tag(&self) -> Result<Option<String>> {
        let output = self.git(&["describe", "--tags", "--abbrev=0"]).await?;
        if !output.status.success() {
            // no tags yet
            return Ok(None);
        }
        let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!tag.is_empty()).then_some(tag))
    }

    async fn commit_all(&self, message: &str) -> Result<()> {
        self.git_ok(&["add", "-A"]).await?;
        self.git_ok(&["commit", "-m", message]).await?;
        Ok(())
    }

    async fn tag(&self, tag: &str) -> Result<()> {
        self.git_ok(&["tag", tag]).await?;
        Ok(())
    }

    async fn push(&self) -> Result<()> {
        self.git_ok(&["push"]).await?;
        self.git_ok(&["push", "--tags"]).await?;
        Ok(())
    }
}
