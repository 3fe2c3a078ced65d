//! Durable approval file

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::PendingApproval;
use crate::error::{ApprovalError, Result};

/// JSON array of approvals, rewritten whole on every save
#[derive(Debug, Clone)]
pub(crate) struct ApprovalStore {
    path: PathBuf,
}

impl ApprovalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_error(&self, reason: impl ToString) -> ApprovalError {
        ApprovalError::Persist {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Write to a sibling temp file, then rename it over the canonical file
    pub fn save(&self, entries: &[PendingApproval]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.persist_error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.persist_error(e))?;
        serde_json::to_writer_pretty(&mut tmp, entries).map_err(|e| self.persist_error(e))?;
        tmp.write_all(b"\n").map_err(|e| self.persist_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.persist_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.persist_error(e.error))?;
        Ok(())
    }

    /// Load the set.
    ///
    /// A missing file is an empty set. Entries that do not deserialize are
    /// skipped, as are repeated ids. A file that is not a JSON array is
    /// renamed to `<file>.corrupt` and the set starts empty.
    pub fn load(&self) -> Result<Vec<PendingApproval>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let items = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) | Err(_) => {
                self.quarantine()?;
                return Ok(Vec::new());
            }
        };

        let mut entries: Vec<PendingApproval> = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<PendingApproval>(item) {
                Ok(entry) if entries.iter().any(|e| e.id == entry.id) => {
                    tracing::warn!(index, approval_id = %entry.id, "skipping duplicate approval id");
                }
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(index, error = %e, path = %self.path.display(), "skipping malformed approval entry");
                }
            }
        }
        Ok(entries)
    }

    fn quarantine(&self) -> Result<()> {
        let mut corrupt = self.path.clone().into_os_string();
        corrupt.push(".corrupt");
        let corrupt = PathBuf::from(corrupt);
        tracing::warn!(
            path = %self.path.display(),
            moved_to = %corrupt.display(),
            "approval file is not a JSON array, starting empty"
        );
        fs::rename(&self.path, &corrupt).map_err(|e| self.persist_error(e))?;
        Ok(())
    }
}
