//! Static analysis and security tools
//!
//! External tools run inside a fresh [`Sandbox`] per call with the artifact
//! written to a file; the file name is appended to the configured command.

use async_trait::async_trait;
use foundry_sandbox::{ExecutionResult, Sandbox};
use std::time::Duration;

use super::{SecurityScanner, StaticAnalyzer};
use crate::error::{FoundryError, Result};

/// Run `command <artifact_file>` in a disposable sandbox
async fn run_tool(
    command: &[String],
    artifact_file: &str,
    artifact: &str,
    timeout: Duration,
) -> Result<ExecutionResult> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| FoundryError::Config("empty tool command".to_string()))?;

    let sandbox = Sandbox::with_prefix("foundry-score-")
        .map_err(|e| FoundryError::Sandbox(e.to_string()))?;
    sandbox
        .write_file(artifact_file, artifact)
        .map_err(|e| FoundryError::Sandbox(e.to_string()))?;

    let mut args = args.to_vec();
    args.push(artifact_file.to_string());

    let result = sandbox
        .run_with_timeout(program, &args, timeout)
        .await
        .map_err(|e| FoundryError::Sandbox(format!("{program}: {e}")))?;

    if result.timed_out {
        return Err(FoundryError::Timeout(timeout.as_millis() as u64));
    }
    // Linters exit non-zero when they find something, so only an unsuccessful
    // run with nothing on stdout counts as a crash.
    if !result.success && result.stdout.trim().is_empty() {
        return Err(FoundryError::Sandbox(format!(
            "{program} exited with {}: {}",
            result.exit_code,
            result.stderr.trim()
        )));
    }
    Ok(result)
}

/// Issue count from tool output: JSON array length, a `results`/`issues`
/// array inside a JSON object, or non-empty lines for plain text.
pub fn count_reported_issues(stdout: &str) -> usize {
    match serde_json::from_str::<serde_json::Value>(stdout.trim()) {
        Ok(serde_json::Value::Array(items)) => items.len(),
        Ok(serde_json::Value::Object(map)) => ["results", "issues", "diagnostics"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_array()).map(Vec::len))
            .unwrap_or(0),
        _ => stdout.lines().filter(|l| !l.trim().is_empty()).count(),
    }
}

/// High/medium finding count from scanner output. JSON results carry a
/// severity (`issue_severity` or `severity`); plain text counts lines
/// mentioning HIGH or MEDIUM.
pub fn count_serious_findings(stdout: &str) -> usize {
    let is_serious = |s: &str| {
        let s = s.to_ascii_uppercase();
        s == "HIGH" || s == "MEDIUM" || s == "CRITICAL"
    };

    let results = match serde_json::from_str::<serde_json::Value>(stdout.trim()) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(serde_json::Value::Object(mut map)) => match map.remove("results") {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => {
            return stdout
                .lines()
                .filter(|l| {
                    let upper = l.to_ascii_uppercase();
                    upper.contains("HIGH") || upper.contains("MEDIUM")
                })
                .count()
        }
    };

    results
        .iter()
        .filter(|r| {
            r.get("issue_severity")
                .or_else(|| r.get("severity"))
                .and_then(|v| v.as_str())
                .map(is_serious)
                .unwrap_or(false)
        })
        .count()
}

/// External static analyzer (ruff, pylint, eslint, ...)
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    command: Vec<String>,
    artifact_file: String,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(command: Vec<String>, artifact_file: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command,
            artifact_file: artifact_file.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StaticAnalyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }

    async fn count_issues(&self, artifact: &str) -> Result<usize> {
        let result = run_tool(&self.command, &self.artifact_file, artifact, self.timeout).await?;
        Ok(count_reported_issues(&result.stdout))
    }
}

/// External security scanner (bandit, semgrep, ...)
#[derive(Debug, Clone)]
pub struct CommandScanner {
    command: Vec<String>,
    artifact_file: String,
    timeout: Duration,
}

impl CommandScanner {
    pub fn new(command: Vec<String>, artifact_file: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command,
            artifact_file: artifact_file.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SecurityScanner for CommandScanner {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }

    async fn count_findings(&self, artifact: &str) -> Result<usize> {
        let result = run_tool(&self.command, &self.artifact_file, artifact, self.timeout).await?;
        Ok(count_serious_findings(&result.stdout))
    }
}

/// Built-in lint: long lines, trailing whitespace, tab indentation and
/// leftover TODO/FIXME markers each count as one issue per line.
#[derive(Debug, Clone)]
pub struct LintHeuristics {
    max_line_width: usize,
}

impl LintHeuristics {
    pub fn new(max_line_width: usize) -> Self {
        Self { max_line_width }
    }

    pub fn lint(&self, artifact: &str) -> usize {
        artifact
            .lines()
            .map(|line| {
                let mut issues = 0;
                if line.chars().count() > self.max_line_width {
                    issues += 1;
                }
                if line.ends_with(' ') || line.ends_with('\t') {
                    issues += 1;
                }
                if line.starts_with('\t') {
                    issues += 1;
                }
                if line.contains("TODO") || line.contains("FIXME") {
                    issues += 1;
                }
                issues
            })
            .sum()
    }
}

impl Default for LintHeuristics {
    fn default() -> Self {
        Self::new(79)
    }
}

#[async_trait]
impl StaticAnalyzer for LintHeuristics {
    fn name(&self) -> &str {
        "lint-heuristics"
    }

    async fn count_issues(&self, artifact: &str) -> Result<usize> {
        Ok(self.lint(artifact))
    }
}
