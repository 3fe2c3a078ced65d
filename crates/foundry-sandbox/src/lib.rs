//! Foundry Sandbox - Disposable Work Areas
//!
//! Every analysis or test run gets its own temporary directory. Files are
//! written into it, an external command runs with the directory as its
//! working directory, and the whole tree is removed when the sandbox drops.
//! Concurrent runs never share a directory.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;

/// Isolated execution environment
pub struct Sandbox {
    /// Removed on drop
    #[allow(dead_code)]
    temp_dir: TempDir,
    /// Root path of the sandbox
    pub root_path: PathBuf,
}

/// Result of a command executed in the sandbox
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl Sandbox {
    /// Create a new empty sandbox
    pub fn new() -> Result<Self> {
        Self::with_prefix("foundry-sandbox-")
    }

    /// Create a sandbox whose directory name starts with `prefix`
    pub fn with_prefix(prefix: &str) -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix(prefix).tempdir()?;

        Ok(Self {
            root_path: temp_dir.path().to_path_buf(),
            temp_dir,
        })
    }

    /// Write files (relative paths) into the sandbox, creating directories
    pub fn prepare(&self, files: &[(PathBuf, String)]) -> Result<()> {
        for (path, content) in files {
            self.write_file(path, content)?;
        }
        Ok(())
    }

    /// Write a single file and return its absolute path
    pub fn write_file(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            bail!("sandbox paths must stay inside the sandbox: {}", path.display());
        }

        let full_path = self.root_path.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, content)?;
        Ok(full_path)
    }

    /// Run a command in the sandbox
    pub async fn run(&self, cmd: &str, args: &[String]) -> Result<ExecutionResult> {
        let start = Instant::now();
        let output = Command::new(cmd)
            .args(args)
            .current_dir(&self.root_path)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(ExecutionResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            elapsed: start.elapsed(),
            timed_out: false,
        })
    }

    /// Run a command, killing it if it outlives `timeout`.
    ///
    /// A timed-out run is reported as an unsuccessful result with
    /// `timed_out` set rather than as an error.
    pub async fn run_with_timeout(
        &self,
        cmd: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let child = Command::new(cmd)
            .args(args)
            .current_dir(&self.root_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ExecutionResult {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    elapsed: start.elapsed(),
                    timed_out: false,
                })
            }
            Err(_) => {
                tracing::warn!(command = cmd, ?timeout, "sandbox command timed out");
                Ok(ExecutionResult {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("timed out after {:?}", timeout),
                    exit_code: -1,
                    elapsed: start.elapsed(),
                    timed_out: true,
                })
            }
        }
    }
}
