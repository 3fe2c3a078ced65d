//! Fly.io adapter and a log-only router

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{DeployResult, DeploymentInstance, Provisioner, TrafficRouter};
use crate::error::DeployError;

/// Provisions instances with the `fly` and `git` command-line tools
#[derive(Debug, Clone)]
pub struct FlyProvisioner {
    /// Parent directory of per-instance checkouts
    workdir: PathBuf,
    fly_bin: String,
}

impl FlyProvisioner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            fly_bin: "fly".to_string(),
        }
    }

    /// Use another binary name, e.g. `flyctl`
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.fly_bin = bin.into();
        self
    }

    fn checkout_dir(&self, instance: &DeploymentInstance) -> PathBuf {
        self.workdir.join(&instance.name)
    }

    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> DeployResult<()> {
        let command = format!("{program} {}", args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(%command, "running provisioning command");
        let output = cmd.output().await.map_err(|e| DeployError::CommandFailed {
            command: command.clone(),
            code: -1,
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(DeployError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for FlyProvisioner {
    async fn create_app(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        self.run(&self.fly_bin, &["apps", "create", instance.name.as_str()], None)
            .await
    }

    async fn checkout(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|e| DeployError::StepFailed {
                step: "checkout".to_string(),
                reason: format!("{}: {e}", self.workdir.display()),
            })?;

        let dir = self.checkout_dir(instance);
        let dir_str = dir.to_string_lossy().into_owned();
        self.run("git", &["clone", instance.repo.as_str(), dir_str.as_str()], None)
            .await?;
        self.run("git", &["checkout", instance.branch.as_str()], Some(&dir))
            .await
    }

    async fn deploy(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        let dir = self.checkout_dir(instance);
        self.run(
            &self.fly_bin,
            &["deploy", "--app", instance.name.as_str(), "--remote-only"],
            Some(&dir),
        )
        .await
    }

    async fn discover_endpoint(&self, instance: &DeploymentInstance) -> DeployResult<String> {
        Ok(format!("https://{}.fly.dev", instance.name))
    }

    async fn destroy(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        self.run(
            &self.fly_bin,
            &["apps", "destroy", instance.name.as_str(), "--yes"],
            None,
        )
        .await?;

        let dir = self.checkout_dir(instance);
        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "could not remove checkout");
            }
        }
        Ok(())
    }
}

/// Records cutovers in the log. DNS and load-balancer changes are left to
/// the operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRouter;

#[async_trait]
impl TrafficRouter for LoggingRouter {
    async fn route_to(&self, instance: &DeploymentInstance) -> DeployResult<()> {
        let Some(endpoint) = instance.endpoint.as_deref() else {
            return Err(DeployError::SwitchFailed(format!(
                "{} has no endpoint",
                instance.name
            )));
        };
        tracing::info!(instance_id = %instance.id, name = %instance.name, %endpoint, "live traffic now routed to instance");
        Ok(())
    }
}
