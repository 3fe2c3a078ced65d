//! Build Loop - plan, build, score, refine, publish, deploy
//!
//! Each iteration asks the planner for approaches and fans out one task per
//! approach. A candidate task builds its artifact, tests and scores it, and
//! keeps refining until it reaches the target score. Accepted candidates are
//! published and deployed; the iteration ends only once every candidate
//! task has settled.
//!
//! `stop()` is cooperative. It is checked between phases, before each
//! refinement and between deployment steps. Collaborator calls and
//! provisioning already in flight finish and their result is discarded; an
//! instance spawned for a stopped candidate is torn down and never receives
//! traffic.

pub mod candidate;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::agent::{invoke_with_timeout, Agents, Role, TaskContext};
use crate::config::{LoopSettings, ProjectSettings};
use crate::deploy::{Cutover, DeploymentManager, InstanceStatus};
use crate::error::{FoundryError, Result};
use crate::publish::VersionControlPublisher;
use crate::scoring::{ScoringEngine, TestRunner, MAX_SCORE};

pub use candidate::{
    extract_code, parse_approaches, Artifact, Candidate, CandidateOutcome, CandidateReport,
    CandidateStatus, IterationReport,
};

/// Loop-level phase, as shown on the status surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Planning,
    Building,
    Settled,
}

/// Snapshot returned by [`BuildLoop::status`]
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub running: bool,
    pub iteration: u64,
    pub phase: Phase,
    pub last_report: Option<IterationReport>,
}

/// Services a loop drives, constructed once by the caller
#[derive(Clone)]
pub struct LoopServices {
    pub agents: Agents,
    pub scoring: ScoringEngine,
    pub tests: Arc<dyn TestRunner>,
    pub publisher: Arc<VersionControlPublisher>,
    pub deployments: Arc<DeploymentManager>,
}

/// Shared by every candidate task of the loop
struct Pipeline {
    services: LoopServices,
    settings: LoopSettings,
    project: ProjectSettings,
    running: AtomicBool,
    wake: Notify,
}

impl Pipeline {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep, returning early when the loop is stopped
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() || !self.is_running() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    async fn ask(&self, role: Role, task: &str, context: &TaskContext) -> Result<String> {
        let collaborator = self.services.agents.for_role(role);
        let output = invoke_with_timeout(
            collaborator.as_ref(),
            role,
            task,
            context,
            self.settings.collaborator_timeout(),
        )
        .await?;
        Ok(output.output)
    }

    async fn plan(&self, iteration: u64) -> Result<Vec<String>> {
        let context = TaskContext::new().with("iteration", iteration);
        let plan = self
            .ask(
                Role::Planner,
                "Plan the next features or improvements to build and test. \
                 List one approach per line.",
                &context,
            )
            .await?;
        Ok(parse_approaches(&plan))
    }

    /// Run the tests and score the current artifact
    async fn evaluate(&self, candidate: &mut Candidate) {
        candidate.transition(CandidateStatus::Scoring);
        let code = candidate.code().to_string();
        let tests = self.services.tests.run(&code).await;
        let breakdown = self.services.scoring.breakdown(&code, tests).await;
        candidate.record_score(tests, breakdown);
        tracing::info!(
            score = breakdown.total(),
            refinements = candidate.refinements,
            "candidate scored"
        );
    }

    async fn run_candidate(self: Arc<Self>, iteration: u64, index: usize, approach: String) -> CandidateReport {
        let mut candidate = Candidate::new(iteration, index, approach);
        let outcome = match self.drive(&mut candidate).await {
            Ok(outcome) => outcome,
            Err(e) => CandidateOutcome::Failed(e.to_string()),
        };
        if matches!(outcome, CandidateOutcome::Abandoned(_)) {
            candidate.transition(CandidateStatus::Abandoned);
        }
        tracing::info!(%outcome, score = ?candidate.score, "candidate settled");
        candidate.into_report(outcome)
    }

    async fn drive(&self, candidate: &mut Candidate) -> Result<CandidateOutcome> {
        let base = TaskContext::new()
            .with("iteration", candidate.iteration)
            .with("candidate", candidate.index)
            .with("approach", &candidate.approach);

        let task = format!("Build the following feature: {}", candidate.approach);
        let output = self.ask(Role::Builder, &task, &base).await?;
        candidate.set_artifact(extract_code(&output));
        self.evaluate(candidate).await;

        let target = self.settings.target_score;
        while candidate.score.unwrap_or(0) < target {
            if !self.is_running() {
                return Ok(CandidateOutcome::Abandoned(
                    "stopped during refinement".to_string(),
                ));
            }
            if let Some(max) = self.settings.max_refinements {
                if candidate.refinements >= max {
                    return Ok(CandidateOutcome::Abandoned(format!(
                        "refinement budget of {max} exhausted at {}/{MAX_SCORE}",
                        candidate.score.unwrap_or(0)
                    )));
                }
            }
            if candidate.refinements > 0 {
                self.pause(self.settings.refinement_backoff()).await;
            }

            candidate.transition(CandidateStatus::Refining);
            candidate.refinements += 1;
            let score = candidate.score.unwrap_or(0);
            let mut context = base
                .clone()
                .with("score", score)
                .with("tests_passed", candidate.tests_passed())
                .with("performance_ok", candidate.performance_ok())
                .with("code", candidate.code());
            if let Some(b) = candidate.breakdown {
                context = context
                    .with("functionality", b.functionality)
                    .with("quality", b.quality)
                    .with("performance", b.performance)
                    .with("safety", b.safety);
            }
            let task = format!("Refine the feature to improve score from {score} to {target}.");
            let output = self.ask(Role::Refiner, &task, &context).await?;
            candidate.set_artifact(extract_code(&output));
            self.evaluate(candidate).await;
        }

        if !self.is_running() {
            return Ok(CandidateOutcome::Abandoned("stopped before publishing".to_string()));
        }

        match self.services.publisher.publish(&candidate.commit_message()).await {
            Ok(tag) => {
                candidate.tag = Some(tag);
                candidate.transition(CandidateStatus::Published);
            }
            Err(e) => {
                tracing::warn!(error = %e, "publish failed");
                return Ok(CandidateOutcome::PublishFailed);
            }
        }

        Ok(self.deploy(candidate).await)
    }

    /// Spawn, wait for health, cut over, retire the old instance
    async fn deploy(&self, candidate: &mut Candidate) -> CandidateOutcome {
        let deployments = &self.services.deployments;
        let spawned = deployments.spawn(&self.project.branch, &self.project.repo_url);
        let id = spawned.id;
        candidate.instance_id = Some(id);

        let discard = |outcome: CandidateOutcome| async move {
            if !deployments.teardown(id).await {
                tracing::warn!(instance_id = %id, "could not tear down discarded instance");
            }
            outcome
        };
        let skip = |reason: String| discard(CandidateOutcome::DeploySkipped(reason));
        let stopped = || discard(CandidateOutcome::Abandoned("stopped during deployment".to_string()));

        let provisioned = spawned.handle.await;
        if !self.is_running() {
            return stopped().await;
        }
        match provisioned {
            Ok(InstanceStatus::Running) => {}
            Ok(status) => return skip(format!("provisioning ended {status}")).await,
            Err(e) => return skip(format!("provisioning task failed: {e}")).await,
        }

        let healthy = deployments
            .wait_until_healthy(id, self.settings.health_attempts, self.settings.health_interval())
            .await;
        if !self.is_running() {
            return stopped().await;
        }
        if !healthy {
            return skip("instance never became healthy".to_string()).await;
        }

        match deployments.cutover(id).await {
            Cutover::Switched { previous } => {
                if let Some(previous) = previous.filter(|_| self.settings.retire_previous) {
                    if !deployments.teardown(previous).await {
                        tracing::warn!(instance_id = %previous, "previous live instance was not retired");
                    }
                }
                CandidateOutcome::Deployed
            }
            Cutover::Refused => skip("traffic switch refused".to_string()).await,
        }
    }
}

/// The autonomous build loop
pub struct BuildLoop {
    pipeline: Arc<Pipeline>,
    iteration: AtomicU64,
    phase: RwLock<Phase>,
    last_report: RwLock<Option<IterationReport>>,
}

impl BuildLoop {
    pub fn new(services: LoopServices, settings: LoopSettings, project: ProjectSettings) -> Result<Self> {
        if settings.target_score > MAX_SCORE {
            return Err(FoundryError::Config(format!(
                "target score {} exceeds {MAX_SCORE}",
                settings.target_score
            )));
        }
        Ok(Self {
            pipeline: Arc::new(Pipeline {
                services,
                settings,
                project,
                running: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            iteration: AtomicU64::new(0),
            phase: RwLock::new(Phase::Idle),
            last_report: RwLock::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_running()
    }

    /// Request a cooperative stop
    pub fn stop(&self) {
        if self.pipeline.running.swap(false, Ordering::SeqCst) {
            tracing::info!("build loop stop requested");
        }
        self.pipeline.wake.notify_waiters();
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            running: self.is_running(),
            iteration: self.iteration.load(Ordering::SeqCst),
            phase: *self.phase.read(),
            last_report: self.last_report.read().clone(),
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }

    /// Run iterations until stopped
    pub async fn run(&self) {
        self.pipeline.running.store(true, Ordering::SeqCst);
        tracing::info!("build loop started");

        while self.is_running() {
            self.run_iteration().await;
            self.pipeline
                .pause(self.pipeline.settings.iteration_interval())
                .await;
        }

        self.set_phase(Phase::Idle);
        tracing::info!(iterations = self.iteration.load(Ordering::SeqCst), "build loop stopped");
    }

    /// Run exactly one iteration with the loop marked running
    pub async fn run_once(&self) -> IterationReport {
        self.pipeline.running.store(true, Ordering::SeqCst);
        let report = self.run_iteration().await;
        self.pipeline.running.store(false, Ordering::SeqCst);
        self.set_phase(Phase::Idle);
        report
    }

    /// One full iteration: plan, fan out, join every candidate
    pub async fn run_iteration(&self) -> IterationReport {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = chrono::Utc::now();
        let span = tracing::info_span!("iteration", iteration);

        let candidates = async {
            self.set_phase(Phase::Planning);
            let Some(approaches) = self.plan_with_retry(iteration).await else {
                return Vec::new();
            };

            self.set_phase(Phase::Building);
            tracing::info!(candidates = approaches.len(), "fanning out");
            self.fan_out(iteration, approaches).await
        }
        .instrument(span)
        .await;

        let report = IterationReport {
            iteration,
            started_at,
            finished_at: chrono::Utc::now(),
            candidates,
        };
        tracing::info!(
            iteration,
            candidates = report.candidates.len(),
            deployed = report.deployed(),
            "iteration settled"
        );
        self.set_phase(Phase::Settled);
        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Ask until the planner yields at least one approach. `None` when the
    /// loop is stopped first.
    async fn plan_with_retry(&self, iteration: u64) -> Option<Vec<String>> {
        loop {
            match self.pipeline.plan(iteration).await {
                Ok(approaches) if !approaches.is_empty() => return Some(approaches),
                Ok(_) => tracing::warn!("planner returned no approaches"),
                Err(e) => tracing::warn!(error = %e, "planning failed"),
            }
            if !self.is_running() {
                return None;
            }
            self.pipeline
                .pause(self.pipeline.settings.planning_backoff())
                .await;
            if !self.is_running() {
                return None;
            }
        }
    }

    async fn fan_out(&self, iteration: u64, approaches: Vec<String>) -> Vec<CandidateReport> {
        let mut tasks = JoinSet::new();
        for (index, approach) in approaches.into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let span = tracing::info_span!("candidate", iteration, candidate = index);
            tasks.spawn(
                async move {
                    let fallback = approach.clone();
                    match AssertUnwindSafe(pipeline.run_candidate(iteration, index, approach))
                        .catch_unwind()
                        .await
                    {
                        Ok(report) => report,
                        Err(_) => {
                            tracing::error!("candidate task panicked");
                            CandidateReport::lost(index, fallback, "candidate task panicked")
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "candidate task was cancelled"),
            }
        }
        reports.sort_by_key(|r| r.index);
        reports
    }
}

impl std::fmt::Debug for BuildLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildLoop")
            .field("running", &self.is_running())
            .field("iteration", &self.iteration.load(Ordering::SeqCst))
            .field("phase", &*self.phase.read())
            .finish()
    }
}
