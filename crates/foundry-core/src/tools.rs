//! File capabilities handed to the build collaborator
//!
//! Every write passes validation, then the approval guard. Forbidden targets
//! are refused, protected targets become approval requests, and everything
//! else is written under the project root.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{FoundryError, Result, ResultExt};
use crate::guard::{ApprovalGuard, GuardPath};

/// Device names Windows refuses as file names, with or without extension
pub const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Where a file extension may be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Files directly at the project root
    Root,
    /// Anywhere under this directory
    Under(Vec<String>),
}

impl RouteTarget {
    fn parse(dir: &str) -> Self {
        match GuardPath::parse(dir) {
            Ok(p) => RouteTarget::Under(p.segments().to_vec()),
            // "." and "/" normalise to nothing
            Err(_) => RouteTarget::Root,
        }
    }

    fn allows(&self, path: &GuardPath) -> bool {
        match self {
            RouteTarget::Root => path.is_root_level(),
            RouteTarget::Under(prefix) => path.segments().len() > prefix.len() && path.starts_with(prefix),
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Root => f.write_str("."),
            RouteTarget::Under(prefix) => write!(f, "{}/", prefix.join("/")),
        }
    }
}

/// Extension to allowed-directory table. Extensions not in the table may go
/// anywhere.
#[derive(Debug, Clone)]
pub struct RoutingRules {
    routes: BTreeMap<String, Vec<RouteTarget>>,
}

impl RoutingRules {
    /// No routing restrictions
    pub fn unrestricted() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// `extension` (with or without the dot) may only live under `dirs`;
    /// `"."` means the project root
    pub fn with_route(mut self, extension: &str, dirs: &[&str]) -> Self {
        let ext = format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase());
        self.routes
            .insert(ext, dirs.iter().map(|d| RouteTarget::parse(d)).collect());
        self
    }

    pub fn check(&self, path: &GuardPath) -> Result<()> {
        let Some(ext) = path.extension() else {
            return Ok(());
        };
        let Some(targets) = self.routes.get(&ext) else {
            return Ok(());
        };
        if targets.iter().any(|t| t.allows(path)) {
            return Ok(());
        }
        let allowed = targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(FoundryError::validation(format!(
            "'{ext}' files belong in [{allowed}], but '{path}' is outside those directories"
        )))
    }
}

/// Layout of the target repository
impl Default for RoutingRules {
    fn default() -> Self {
        Self::unrestricted()
            .with_route(".py", &["backend/"])
            .with_route(".js", &["frontend/", "scripts/"])
            .with_route(".jsx", &["frontend/"])
            .with_route(".ts", &["frontend/"])
            .with_route(".tsx", &["frontend/", "mobile/"])
            .with_route(".css", &["frontend/"])
            .with_route(".json", &["backend/", "frontend/", "mobile/", "."])
            .with_route(".md", &["."])
            .with_route(".html", &["frontend/"])
            .with_route(".toml", &["."])
            .with_route(".txt", &["backend/", "."])
            .with_route(".yml", &["."])
            .with_route(".yaml", &["."])
    }
}

/// Result of a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { path: String },
    BlockedForbidden { path: String },
    QueuedForApproval { id: String, path: String },
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Written { path } => write!(f, "Successfully wrote to {path}"),
            WriteOutcome::BlockedForbidden { path } => {
                write!(f, "BLOCKED: '{path}' is a forbidden path and cannot be written to.")
            }
            WriteOutcome::QueuedForApproval { id, path } => write!(
                f,
                "QUEUED FOR APPROVAL: '{path}' is a protected core file. The change has been \
                 queued for human review (approval id: {id}) and takes effect only after \
                 /api/approvals/{id}/approve. Do not attempt to bypass this protection."
            ),
        }
    }
}

/// Guarded file access rooted at the project directory
#[derive(Debug, Clone)]
pub struct WriteTool {
    root: PathBuf,
    guard: Arc<ApprovalGuard>,
    routing: RoutingRules,
}

impl WriteTool {
    pub fn new(root: impl Into<PathBuf>, guard: Arc<ApprovalGuard>) -> Self {
        Self {
            root: root.into(),
            guard,
            routing: RoutingRules::default(),
        }
    }

    pub fn with_routing(mut self, routing: RoutingRules) -> Self {
        self.routing = routing;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalise and validate a collaborator-supplied path
    fn validate(&self, raw: &str) -> Result<GuardPath> {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.as_bytes()[1] == b':' {
            return Err(FoundryError::validation(format!(
                "absolute paths are not allowed: {raw}"
            )));
        }
        let path = GuardPath::parse(trimmed)?;

        for segment in path.segments() {
            let stem = segment.split('.').next().unwrap_or_default().to_ascii_lowercase();
            if WINDOWS_RESERVED_NAMES.contains(&stem.as_str()) {
                return Err(FoundryError::validation(format!(
                    "'{segment}' is a Windows reserved file name"
                )));
            }
        }
        Ok(path)
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        if content.is_empty() {
            return Err(FoundryError::validation(format!(
                "refusing to write empty content to {path}"
            )));
        }
        let target = self.validate(path)?;
        let shown = target.as_string();

        if self.guard.is_forbidden(&shown) {
            tracing::warn!(file = %shown, "write to forbidden path blocked");
            return Ok(WriteOutcome::BlockedForbidden { path: shown });
        }
        self.routing.check(&target)?;

        if self.guard.is_protected(&shown) {
            let reason = format!("attempted to modify protected core file: {shown}");
            let approval = self.guard.request_approval(&shown, content, &reason).await?;
            return Ok(WriteOutcome::QueuedForApproval {
                id: approval.id,
                path: shown,
            });
        }

        let full = target
            .segments()
            .iter()
            .fold(self.root.clone(), |acc, s| acc.join(s));
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(FoundryError::from)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(FoundryError::from)
            .with_context(|| format!("writing {shown}"))?;

        tracing::info!(file = %shown, bytes = content.len(), "file written");
        Ok(WriteOutcome::Written { path: shown })
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        let target = GuardPath::parse(path)?;
        if self.guard.is_forbidden(&target.as_string()) {
            return Err(FoundryError::validation(format!(
                "'{target}' is a forbidden path"
            )));
        }
        let full = target
            .segments()
            .iter()
            .fold(self.root.clone(), |acc, s| acc.join(s));
        tokio::fs::read_to_string(&full)
            .await
            .map_err(FoundryError::from)
            .with_context(|| format!("reading {target}"))
    }
}
