//! Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use foundry_core::agent::{AgentOutput, Agents, Collaborator, TaskContext};
use foundry_core::build_loop::{BuildLoop, LoopServices};
use foundry_core::config::{DeploySettings, LoopSettings, ProjectSettings};
use foundry_core::deploy::{DeployResult, DeploymentInstance, DeploymentManager, LoggingRouter, Provisioner};
use foundry_core::error::{DeployError, FoundryError, Result};
use foundry_core::publish::{SourceControl, VersionControlPublisher};
use foundry_core::scoring::{PatternScanner, ScoringEngine, StaticAnalyzer, TestOutcome, TestRunner};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Barrier;

pub const CLEAN_CODE: &str = "def add(a, b):\n    return a + b\n";
pub const ROUGH_CODE: &str = "def add(a, b):\n    return a + b  # TODO tidy\n";

/// Serve `status_line` to every request on an ephemeral port
pub async fn health_server(status_line: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// Provisioner that "deploys" to a fixed endpoint
pub struct LocalProvisioner {
    pub endpoint: String,
    pub fail_deploy: bool,
    pub deploy_delay: Option<Duration>,
    pub destroyed: Mutex<Vec<String>>,
}

impl LocalProvisioner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            fail_deploy: false,
            deploy_delay: None,
            destroyed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create_app(&self, _: &DeploymentInstance) -> DeployResult<()> {
        Ok(())
    }

    async fn checkout(&self, _: &DeploymentInstance) -> DeployResult<()> {
        Ok(())
    }

    async fn deploy(&self, _: &DeploymentInstance) -> DeployResult<()> {
        if let Some(delay) = self.deploy_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_deploy {
            return Err(DeployError::CommandFailed {
                command: "fly deploy".into(),
                code: 1,
                stderr: "build failed".into(),
            });
        }
        Ok(())
    }

    async fn discover_endpoint(&self, _: &DeploymentInstance) -> DeployResult<String> {
        Ok(self.endpoint.clone())
    }

    async fn destroy(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        self.destroyed.lock().push(instance.name.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryScm {
    pub tags: Mutex<Vec<String>>,
    pub commits: Mutex<Vec<String>>,
    pub fail_commit: bool,
}

#[async_trait]
impl SourceControl for MemoryScm {
    async fn latest_tag(&self) -> Result<Option<String>> {
        Ok(self.tags.lock().last().cloned())
    }

    async fn commit_all(&self, message: &str) -> Result<()> {
        if self.fail_commit {
            return Err(FoundryError::SourceControl("remote rejected".into()));
        }
        self.commits.lock().push(message.to_string());
        Ok(())
    }

    async fn tag(&self, tag: &str) -> Result<()> {
        self.tags.lock().push(tag.to_string());
        Ok(())
    }

    async fn push(&self) -> Result<()> {
        Ok(())
    }
}

/// Counts `TODO` markers
pub struct TodoCounter;

#[async_trait]
impl StaticAnalyzer for TodoCounter {
    fn name(&self) -> &str {
        "todo-counter"
    }

    async fn count_issues(&self, artifact: &str) -> Result<usize> {
        Ok(artifact.matches("TODO").count())
    }
}

pub struct FixedTests(pub Option<TestOutcome>);

#[async_trait]
impl TestRunner for FixedTests {
    async fn run(&self, _artifact: &str) -> Option<TestOutcome> {
        self.0
    }
}

/// Planner returning scripted plans in order, repeating the last one
pub struct ScriptedPlanner {
    plans: Mutex<Vec<String>>,
    pub calls: Mutex<usize>,
}

impl ScriptedPlanner {
    pub fn new(plans: &[&str]) -> Self {
        Self {
            plans: Mutex::new(plans.iter().rev().map(|p| p.to_string()).collect()),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Collaborator for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted-planner"
    }

    async fn invoke(&self, _task: &str, _context: &TaskContext) -> Result<AgentOutput> {
        *self.calls.lock() += 1;
        let mut plans = self.plans.lock();
        let plan = if plans.len() > 1 {
            plans.pop().unwrap_or_default()
        } else {
            plans.last().cloned().unwrap_or_default()
        };
        Ok(AgentOutput::new(plan))
    }
}

/// Builder that waits for `parties` concurrent builds before answering
/// and fails any approach containing "broken"
pub struct Builder {
    pub barrier: Option<Arc<Barrier>>,
    pub code: &'static str,
}

#[async_trait]
impl Collaborator for Builder {
    fn name(&self) -> &str {
        "builder"
    }

    async fn invoke(&self, _task: &str, context: &TaskContext) -> Result<AgentOutput> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if context.get("approach").unwrap_or_default().contains("broken") {
            return Err(FoundryError::validation("model refused"));
        }
        Ok(AgentOutput::new(format!("```python\n{}```", self.code)))
    }
}

/// Refiner returning fixed code and counting calls
pub struct Refiner {
    pub code: &'static str,
    pub calls: Mutex<u32>,
}

impl Refiner {
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Collaborator for Refiner {
    fn name(&self) -> &str {
        "refiner"
    }

    async fn invoke(&self, _task: &str, _context: &TaskContext) -> Result<AgentOutput> {
        *self.calls.lock() += 1;
        tokio::task::yield_now().await;
        Ok(AgentOutput::new(self.code))
    }
}

pub fn fast_settings() -> LoopSettings {
    LoopSettings {
        iteration_interval_secs: 0,
        planning_backoff_secs: 0,
        refinement_backoff_ms: 0,
        max_refinements: None,
        target_score: 10,
        collaborator_timeout_secs: 5,
        health_attempts: 2,
        health_interval_ms: 10,
        retire_previous: true,
    }
}

pub struct Harness {
    pub build_loop: Arc<BuildLoop>,
    pub deployments: Arc<DeploymentManager>,
    pub scm: Arc<MemoryScm>,
    pub provisioner: Arc<LocalProvisioner>,
}

pub struct HarnessBuilder {
    pub planner: Arc<dyn Collaborator>,
    pub builder: Arc<dyn Collaborator>,
    pub refiner: Arc<dyn Collaborator>,
    pub tests: Option<TestOutcome>,
    pub scm: MemoryScm,
    pub provisioner: LocalProvisioner,
    pub settings: LoopSettings,
}

impl HarnessBuilder {
    pub fn new(plan: &str, endpoint: &str) -> Self {
        Self {
            planner: Arc::new(ScriptedPlanner::new(&[plan])),
            builder: Arc::new(Builder {
                barrier: None,
                code: CLEAN_CODE,
            }),
            refiner: Arc::new(Refiner::new(CLEAN_CODE)),
            tests: Some(TestOutcome::passing()),
            scm: MemoryScm::default(),
            provisioner: LocalProvisioner::new(endpoint),
            settings: fast_settings(),
        }
    }

    pub fn build(self) -> Harness {
        let scm = Arc::new(self.scm);
        let provisioner = Arc::new(self.provisioner);
        let deployments = Arc::new(
            DeploymentManager::new(
                provisioner.clone(),
                Arc::new(LoggingRouter),
                &DeploySettings::default(),
            )
            .unwrap(),
        );
        let services = LoopServices {
            agents: Agents {
                planner: self.planner,
                builder: self.builder,
                refiner: self.refiner,
            },
            scoring: ScoringEngine::new(Arc::new(TodoCounter), Arc::new(PatternScanner::new())),
            tests: Arc::new(FixedTests(self.tests)),
            publisher: Arc::new(VersionControlPublisher::new(scm.clone()).with_push(false)),
            deployments: deployments.clone(),
        };
        let build_loop = Arc::new(
            BuildLoop::new(services, self.settings, ProjectSettings::default()).unwrap(),
        );
        Harness {
            build_loop,
            deployments,
            scm,
            provisioner,
        }
    }
}
