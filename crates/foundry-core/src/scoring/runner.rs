//! Dynamic test execution

use async_trait::async_trait;
use foundry_sandbox::Sandbox;
use std::time::Duration;

use super::TestOutcome;
use crate::config::ScoringSettings;

/// Executes the tests for an artifact.
///
/// `None` means no test run happened, which scores no functionality or
/// performance points.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, artifact: &str) -> Option<TestOutcome>;
}

/// Runs a configured test command against the artifact in a disposable sandbox
#[derive(Debug, Clone)]
pub struct SandboxTestRunner {
    command: Option<Vec<String>>,
    artifact_file: String,
    budget: Duration,
    timeout: Duration,
}

impl SandboxTestRunner {
    pub fn new(
        command: Option<Vec<String>>,
        artifact_file: impl Into<String>,
        budget: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.filter(|c| !c.is_empty()),
            artifact_file: artifact_file.into(),
            budget,
            timeout,
        }
    }

    pub fn from_settings(settings: &ScoringSettings) -> Self {
        Self::new(
            settings.test_command.clone(),
            settings.artifact_file.clone(),
            settings.performance_budget(),
            settings.tool_timeout(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }
}

#[async_trait]
impl TestRunner for SandboxTestRunner {
    async fn run(&self, artifact: &str) -> Option<TestOutcome> {
        let (program, args) = self.command.as_ref()?.split_first()?;

        let sandbox = match Sandbox::with_prefix("foundry-test-") {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "could not create test sandbox");
                return None;
            }
        };
        if let Err(e) = sandbox.write_file(&self.artifact_file, artifact) {
            tracing::warn!(error = %e, "could not write artifact into test sandbox");
            return None;
        }

        let mut args = args.to_vec();
        args.push(self.artifact_file.clone());

        match sandbox.run_with_timeout(program, &args, self.timeout).await {
            Ok(result) => {
                let outcome = TestOutcome::new(
                    result.success && !result.timed_out,
                    !result.timed_out && result.elapsed <= self.budget,
                );
                tracing::debug!(
                    command = %program,
                    exit_code = result.exit_code,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    ?outcome,
                    "test run finished"
                );
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(command = %program, error = %e, "test command could not be started");
                None
            }
        }
    }
}
