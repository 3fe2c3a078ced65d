use anyhow::Context;
use std::sync::Arc;

use foundry_core::build_loop::{BuildLoop, LoopServices};
use foundry_core::deploy::{DeploymentManager, FlyProvisioner, LoggingRouter};
use foundry_core::publish::{GitCli, VersionControlPublisher};
use foundry_core::scoring::{SandboxTestRunner, ScoringEngine};
use foundry_core::{ApprovalGuard, FoundryConfig, WriteTool};
use foundry_gateway::{Gateway, GatewayState};

/// Every long-lived service, constructed once and shared
pub struct Services {
    pub guard: Arc<ApprovalGuard>,
    pub deployments: Arc<DeploymentManager>,
    pub build_loop: Arc<BuildLoop>,
}

impl Services {
    pub fn build(config: &FoundryConfig) -> anyhow::Result<Self> {
        let guard = Arc::new(open_guard(config)?);

        if config.agent.api_key.is_none() {
            tracing::warn!(base_url = %config.agent.base_url, "no API key configured for collaborators");
        }
        let files = Arc::new(WriteTool::new(config.project.root.clone(), guard.clone()));
        let agents = foundry_agent::registry(&config.agent, Some(files)).resolve()?;

        let deployments = Arc::new(DeploymentManager::new(
            Arc::new(FlyProvisioner::new(config.deploy.workdir.clone())),
            Arc::new(LoggingRouter),
            &config.deploy,
        )?);

        let tests = SandboxTestRunner::from_settings(&config.scoring);
        if !tests.is_configured() {
            tracing::warn!("no test command configured; candidates cannot score above 4");
        }

        let publisher = VersionControlPublisher::new(Arc::new(GitCli::new(config.project.root.clone())))
            .with_push(config.deploy.push);

        let services = LoopServices {
            agents,
            scoring: ScoringEngine::from_settings(&config.scoring),
            tests: Arc::new(tests),
            publisher: Arc::new(publisher),
            deployments: deployments.clone(),
        };
        let build_loop = BuildLoop::new(services, config.build_loop.clone(), config.project.clone())?;

        Ok(Self {
            guard,
            deployments,
            build_loop: Arc::new(build_loop),
        })
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            GatewayState::new(self.guard.clone())
                .with_deployments(self.deployments.clone())
                .with_build_loop(self.build_loop.clone()),
        )
    }
}

pub fn open_guard(config: &FoundryConfig) -> anyhow::Result<ApprovalGuard> {
    let path = config.approvals_path();
    ApprovalGuard::from_settings(&config.approvals, &path)
        .with_context(|| format!("failed to open approvals at {}", path.display()))
}
