//! Scoring Engine - bounded 0-10 code score
//!
//! A score is the sum of four independent sub-scores:
//!
//! | dimension     | range | source                                   |
//! |---------------|-------|------------------------------------------|
//! | functionality | 0-4   | test outcome: all tests passed           |
//! | quality       | 0-2   | static analysis issue count              |
//! | performance   | 0-2   | test outcome: performance budget met     |
//! | safety        | 0-2   | security scan high/medium finding count  |
//!
//! Functionality and performance are only ever earned from an executed
//! test run. Analysis tools that crash or cannot be started score 0 for
//! their dimension; scoring itself never fails.

pub mod analyzers;
pub mod runner;
pub mod security;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ScoringSettings;
use crate::error::Result;

pub use analyzers::{CommandAnalyzer, CommandScanner, LintHeuristics};
pub use runner::{SandboxTestRunner, TestRunner};
pub use security::{PatternScanner, Severity};

/// Maximum total score
pub const MAX_SCORE: u8 = 10;

/// Outcome of running the tests for an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Every test passed
    pub all_passed: bool,
    /// The run stayed within the performance budget
    pub performance_ok: bool,
}

impl TestOutcome {
    pub fn new(all_passed: bool, performance_ok: bool) -> Self {
        Self {
            all_passed,
            performance_ok,
        }
    }

    pub fn passing() -> Self {
        Self::new(true, true)
    }
}

/// Per-dimension result of one scoring pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0-4
    pub functionality: u8,
    /// 0-2
    pub quality: u8,
    /// 0-2
    pub performance: u8,
    /// 0-2
    pub safety: u8,
}

impl ScoreBreakdown {
    /// Sum of the sub-scores, clamped to [0, 10]
    pub fn total(&self) -> u8 {
        let sum = self.functionality as u32
            + self.quality as u32
            + self.performance as u32
            + self.safety as u32;
        sum.min(MAX_SCORE as u32) as u8
    }
}

/// Static analysis pass; returns the number of issues found
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn count_issues(&self, artifact: &str) -> Result<usize>;
}

/// Security scan; returns the number of high or medium findings
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    fn name(&self) -> &str;

    async fn count_findings(&self, artifact: &str) -> Result<usize>;
}

/// Quality sub-score from an issue count: 0 → 2, ≤5 → 1, >5 → 0
pub fn quality_points(issues: usize) -> u8 {
    match issues {
        0 => 2,
        1..=5 => 1,
        _ => 0,
    }
}

/// Safety sub-score from a finding count: 0 → 2, ≤2 → 1, >2 → 0
pub fn safety_points(findings: usize) -> u8 {
    match findings {
        0 => 2,
        1..=2 => 1,
        _ => 0,
    }
}

/// Combines the analyzers and a test outcome into a score
#[derive(Clone)]
pub struct ScoringEngine {
    analyzer: Arc<dyn StaticAnalyzer>,
    scanner: Arc<dyn SecurityScanner>,
}

impl ScoringEngine {
    pub fn new(analyzer: Arc<dyn StaticAnalyzer>, scanner: Arc<dyn SecurityScanner>) -> Self {
        Self { analyzer, scanner }
    }

    /// Engine using only the built-in analyzers
    pub fn builtin() -> Self {
        Self::new(
            Arc::new(LintHeuristics::default()),
            Arc::new(PatternScanner::new()),
        )
    }

    /// Pick external commands where configured, built-ins otherwise
    pub fn from_settings(settings: &ScoringSettings) -> Self {
        let analyzer: Arc<dyn StaticAnalyzer> = match &settings.analyzer_command {
            Some(cmd) if !cmd.is_empty() => Arc::new(CommandAnalyzer::new(
                cmd.clone(),
                settings.artifact_file.clone(),
                settings.tool_timeout(),
            )),
            _ => Arc::new(LintHeuristics::new(settings.max_line_width)),
        };
        let scanner: Arc<dyn SecurityScanner> = match &settings.scanner_command {
            Some(cmd) if !cmd.is_empty() => Arc::new(CommandScanner::new(
                cmd.clone(),
                settings.artifact_file.clone(),
                settings.tool_timeout(),
            )),
            _ => Arc::new(PatternScanner::new()),
        };
        Self::new(analyzer, scanner)
    }

    /// Score an artifact, 0-10
    pub async fn score(&self, artifact: &str, outcome: Option<TestOutcome>) -> u8 {
        self.breakdown(artifact, outcome).await.total()
    }

    /// Score an artifact and keep the per-dimension detail
    pub async fn breakdown(&self, artifact: &str, outcome: Option<TestOutcome>) -> ScoreBreakdown {
        let (issues, findings) = tokio::join!(
            self.analyzer.count_issues(artifact),
            self.scanner.count_findings(artifact)
        );

        let quality = match issues {
            Ok(n) => quality_points(n),
            Err(e) => {
                tracing::warn!(analyzer = self.analyzer.name(), error = %e, "static analysis failed, quality scored 0");
                0
            }
        };
        let safety = match findings {
            Ok(n) => safety_points(n),
            Err(e) => {
                tracing::warn!(scanner = self.scanner.name(), error = %e, "security scan failed, safety scored 0");
                0
            }
        };

        let (functionality, performance) = match outcome {
            Some(o) => (
                if o.all_passed { 4 } else { 0 },
                if o.performance_ok { 2 } else { 0 },
            ),
            None => (0, 0),
        };

        let breakdown = ScoreBreakdown {
            functionality,
            quality,
            performance,
            safety,
        };
        tracing::debug!(?breakdown, total = breakdown.total(), "artifact scored");
        breakdown
    }
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("analyzer", &self.analyzer.name())
            .field("scanner", &self.scanner.name())
            .finish()
    }
}
