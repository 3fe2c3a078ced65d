//! Candidates and iteration reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::scoring::{ScoreBreakdown, TestOutcome};

/// Where a candidate is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Scoring,
    Refining,
    Published,
    Abandoned,
}

/// Generated code with its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub code: String,
    /// blake3, hex
    pub hash: String,
}

impl Artifact {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        let hash = blake3::hash(code.as_bytes()).to_hex().to_string();
        Self { code, hash }
    }
}

/// One planned approach within an iteration
#[derive(Debug, Clone)]
pub struct Candidate {
    pub iteration: u64,
    pub index: usize,
    pub approach: String,
    pub score: Option<u8>,
    pub breakdown: Option<ScoreBreakdown>,
    pub tests: Option<TestOutcome>,
    pub artifact: Option<Artifact>,
    pub status: CandidateStatus,
    pub refinements: u32,
    pub tag: Option<String>,
    pub instance_id: Option<Uuid>,
}

impl Candidate {
    pub fn new(iteration: u64, index: usize, approach: impl Into<String>) -> Self {
        Self {
            iteration,
            index,
            approach: approach.into(),
            score: None,
            breakdown: None,
            tests: None,
            artifact: None,
            status: CandidateStatus::Pending,
            refinements: 0,
            tag: None,
            instance_id: None,
        }
    }

    pub fn transition(&mut self, status: CandidateStatus) {
        tracing::debug!(
            iteration = self.iteration,
            candidate = self.index,
            from = ?self.status,
            to = ?status,
            "candidate status"
        );
        self.status = status;
    }

    pub fn set_artifact(&mut self, code: impl Into<String>) {
        self.artifact = Some(Artifact::new(code));
    }

    pub fn code(&self) -> &str {
        self.artifact.as_ref().map(|a| a.code.as_str()).unwrap_or_default()
    }

    pub fn record_score(&mut self, tests: Option<TestOutcome>, breakdown: ScoreBreakdown) {
        self.tests = tests;
        self.breakdown = Some(breakdown);
        self.score = Some(breakdown.total());
    }

    pub fn tests_passed(&self) -> bool {
        self.tests.map(|t| t.all_passed).unwrap_or(false)
    }

    pub fn performance_ok(&self) -> bool {
        self.tests.map(|t| t.performance_ok).unwrap_or(false)
    }

    /// Commit message for publishing this candidate
    pub fn commit_message(&self) -> String {
        format!(
            "Iteration {} candidate {}: {} — scored {}/10 (tests passed: {}, performance ok: {})",
            self.iteration,
            self.index,
            self.approach,
            self.score.unwrap_or(0),
            self.tests_passed(),
            self.performance_ok()
        )
    }

    pub fn into_report(self, outcome: CandidateOutcome) -> CandidateReport {
        CandidateReport {
            index: self.index,
            approach: self.approach,
            score: self.score,
            breakdown: self.breakdown,
            refinements: self.refinements,
            artifact_hash: self.artifact.map(|a| a.hash),
            tag: self.tag,
            instance_id: self.instance_id,
            outcome,
        }
    }
}

/// How a candidate's pipeline ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Deployed,
    DeploySkipped(String),
    PublishFailed,
    Abandoned(String),
    Failed(String),
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateOutcome::Deployed => f.write_str("deployed"),
            CandidateOutcome::DeploySkipped(r) => write!(f, "deploy_skipped({r})"),
            CandidateOutcome::PublishFailed => f.write_str("publish_failed"),
            CandidateOutcome::Abandoned(r) => write!(f, "abandoned({r})"),
            CandidateOutcome::Failed(r) => write!(f, "failed({r})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub index: usize,
    pub approach: String,
    pub score: Option<u8>,
    pub breakdown: Option<ScoreBreakdown>,
    pub refinements: u32,
    pub artifact_hash: Option<String>,
    pub tag: Option<String>,
    pub instance_id: Option<Uuid>,
    pub outcome: CandidateOutcome,
}

impl CandidateReport {
    /// Report for a candidate whose task died before producing one
    pub fn lost(index: usize, approach: impl Into<String>, reason: impl Into<String>) -> Self {
        Candidate::new(0, index, approach).into_report(CandidateOutcome::Failed(reason.into()))
    }
}

/// Everything one iteration produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ordered by candidate index
    pub candidates: Vec<CandidateReport>,
}

impl IterationReport {
    pub fn deployed(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.outcome == CandidateOutcome::Deployed)
            .count()
    }
}

/// One approach per non-blank line, trimmed
pub fn parse_approaches(plan: &str) -> Vec<String> {
    plan.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Body of the first fenced code block, or the whole output when there is
/// none
pub fn extract_code(output: &str) -> String {
    let Some(start) = output.find("```") else {
        return output.to_string();
    };
    let after_fence = &output[start + 3..];
    // skip the info string (```python)
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].to_string(),
        None => body.to_string(),
    }
}
