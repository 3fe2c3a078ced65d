//! Foundry configuration
//!
//! Loaded from `foundry.toml` (every section optional), then overridden by
//! environment variables after `.env` has been read.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FoundryError, Result};

/// Default gateway port
pub const DEFAULT_PORT: u16 = 8080;

/// Default gateway host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundryConfig {
    pub project: ProjectSettings,
    #[serde(rename = "loop")]
    pub build_loop: LoopSettings,
    pub scoring: ScoringSettings,
    pub approvals: ApprovalSettings,
    pub deploy: DeploySettings,
    pub agent: AgentSettings,
    pub gateway: GatewaySettings,
}

impl FoundryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project root
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project.root = root.into();
        self
    }

    /// Set the approvals file
    pub fn with_approvals_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.approvals.file = path.into();
        self
    }

    /// Set the gateway host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.gateway.host = host.into();
        self
    }

    /// Set the gateway port
    pub fn with_port(mut self, port: u16) -> Self {
        self.gateway.port = port;
        self
    }

    /// Bound the refinement loop (None = refine until the target score)
    pub fn with_max_refinements(mut self, max: Option<u32>) -> Self {
        self.build_loop.max_refinements = max;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from `path` if it exists, fall back to defaults otherwise, then
    /// apply `.env` and environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::info!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("FOUNDRY_PROJECT_ROOT") {
            self.project.root = PathBuf::from(root);
        }
        if let Some(repo) = lookup("FOUNDRY_REPO_URL") {
            self.project.repo_url = repo;
        }
        if let Some(file) = lookup("FOUNDRY_APPROVALS_FILE") {
            self.approvals.file = PathBuf::from(file);
        }
        if let Some(url) = lookup("FOUNDRY_LLM_BASE_URL") {
            self.agent.base_url = url;
        }
        if let Some(model) = lookup("FOUNDRY_LLM_MODEL") {
            self.agent.model = model;
        }
        if let Some(key) = lookup("FOUNDRY_LLM_API_KEY") {
            self.agent.api_key = Some(key);
        }
        if let Some(host) = lookup("API_HOST") {
            self.gateway.host = host;
        }
        let port = lookup("PORT").or_else(|| lookup("API_PORT"));
        if let Some(port) = port {
            match port.parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid port override"),
            }
        }
    }

    /// Reject settings that would make the loop spin or the score unreachable
    pub fn validate(&self) -> Result<()> {
        if self.build_loop.target_score > 10 {
            return Err(FoundryError::Config(format!(
                "loop.target_score must be <= 10, got {}",
                self.build_loop.target_score
            )));
        }
        if self.build_loop.planning_backoff_secs == 0 {
            return Err(FoundryError::Config(
                "loop.planning_backoff_secs must be > 0".to_string(),
            ));
        }
        if self.build_loop.collaborator_timeout_secs == 0 {
            return Err(FoundryError::Config(
                "loop.collaborator_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.deploy.health_timeout_ms == 0 {
            return Err(FoundryError::Config(
                "deploy.health_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.gateway.host.trim().is_empty() {
            return Err(FoundryError::Config("gateway.host must not be empty".to_string()));
        }
        Ok(())
    }

    /// Approvals file resolved against the project root when relative
    pub fn approvals_path(&self) -> PathBuf {
        if self.approvals.file.is_absolute() {
            self.approvals.file.clone()
        } else {
            self.project.root.join(&self.approvals.file)
        }
    }

    /// Gateway socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.gateway.host, self.gateway.port)
            .parse()
            .map_err(|e| FoundryError::Config(format!("invalid gateway address: {e}")))
    }
}

/// Target repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Working copy the loop writes into and commits from
    pub root: PathBuf,
    /// Repository deployments are cloned from
    pub repo_url: String,
    /// Branch deployments check out
    pub branch: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            repo_url: String::new(),
            branch: "main".to_string(),
        }
    }
}

/// Build loop timing and convergence policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Pause between iterations
    pub iteration_interval_secs: u64,
    /// Pause before re-planning when the planner produced nothing
    pub planning_backoff_secs: u64,
    /// Pause between refinement attempts
    pub refinement_backoff_ms: u64,
    /// Refinement attempts per candidate; unset means until the target score
    pub max_refinements: Option<u32>,
    /// Score a candidate must reach before it is published
    pub target_score: u8,
    /// Deadline for a single collaborator call
    pub collaborator_timeout_secs: u64,
    /// Health check attempts after provisioning
    pub health_attempts: u32,
    pub health_interval_ms: u64,
    /// Tear down the previously live instance after a successful cutover
    pub retire_previous: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            iteration_interval_secs: 5,
            planning_backoff_secs: 5,
            refinement_backoff_ms: 0,
            max_refinements: None,
            target_score: 10,
            collaborator_timeout_secs: 300,
            health_attempts: 5,
            health_interval_ms: 2_000,
            retire_previous: true,
        }
    }
}

impl LoopSettings {
    pub fn iteration_interval(&self) -> Duration {
        Duration::from_secs(self.iteration_interval_secs)
    }

    pub fn planning_backoff(&self) -> Duration {
        Duration::from_secs(self.planning_backoff_secs)
    }

    pub fn refinement_backoff(&self) -> Duration {
        Duration::from_millis(self.refinement_backoff_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// External tools used by the scoring engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// File name the artifact is written to inside the sandbox
    pub artifact_file: String,
    /// Static analyzer command; the artifact file name is appended.
    /// Unset uses the built-in lint heuristics.
    pub analyzer_command: Option<Vec<String>>,
    /// Security scanner command; unset uses the built-in pattern scanner
    pub scanner_command: Option<Vec<String>>,
    /// Test command run against the artifact; unset means no test outcome
    pub test_command: Option<Vec<String>>,
    /// Wall-clock budget for the test command to count as performant
    pub performance_budget_ms: u64,
    /// Hard deadline for any single tool run
    pub tool_timeout_secs: u64,
    /// Maximum line width for the built-in lint heuristics
    pub max_line_width: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            artifact_file: "artifact.py".to_string(),
            analyzer_command: None,
            scanner_command: None,
            test_command: None,
            performance_budget_ms: 10_000,
            tool_timeout_secs: 120,
            max_line_width: 79,
        }
    }
}

impl ScoringSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn performance_budget(&self) -> Duration {
        Duration::from_millis(self.performance_budget_ms)
    }
}

/// Approval gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Durable approvals file (relative to the project root unless absolute)
    pub file: PathBuf,
    /// Overrides the built-in protected list when set
    pub protected: Option<Vec<String>>,
    /// Overrides the built-in forbidden list when set
    pub forbidden: Option<Vec<String>>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".foundry/approvals.json"),
            protected: None,
            forbidden: None,
        }
    }
}

/// Deployment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Instance names are `<prefix>-<id prefix>`
    pub app_prefix: String,
    /// Path appended to the endpoint for health checks
    pub health_path: String,
    pub health_timeout_ms: u64,
    /// Directory provisioning checkouts are created in
    pub workdir: PathBuf,
    /// Push commits and tags after publishing
    pub push: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            app_prefix: "foundry".to_string(),
            health_path: "/".to_string(),
            health_timeout_ms: 5_000,
            workdir: std::env::temp_dir().join("foundry-deploy"),
            push: true,
        }
    }
}

impl DeploySettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// Collaborator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Review surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = FoundryConfig::default();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.build_loop.target_score, 10);
        assert!(config.build_loop.max_refinements.is_none());
        assert_eq!(config.deploy.health_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = FoundryConfig::new()
            .with_host("0.0.0.0")
            .with_port(9000)
            .with_max_refinements(Some(3));

        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.build_loop.max_refinements, Some(3));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FoundryConfig = toml::from_str(
            r#"
            [loop]
            max_refinements = 4

            [scoring]
            analyzer_command = ["ruff", "check", "--output-format", "json"]
            "#,
        )
        .unwrap();

        assert_eq!(config.build_loop.max_refinements, Some(4));
        assert_eq!(config.build_loop.target_score, 10);
        assert_eq!(
            config.scoring.analyzer_command.as_deref().map(|c| c[0].as_str()),
            Some("ruff")
        );
        assert_eq!(config.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foundry.toml");
        let config = FoundryConfig::new().with_port(7070);
        config.to_file(&path).unwrap();

        let loaded = FoundryConfig::from_file(&path).unwrap();
        assert_eq!(loaded.gateway.port, 7070);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FOUNDRY_APPROVALS_FILE", "/var/lib/foundry/approvals.json"),
            ("API_PORT", "9100"),
            ("FOUNDRY_LLM_MODEL", "local-model"),
        ]
        .into_iter()
        .collect();

        let mut config = FoundryConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.agent.model, "local-model");
        assert_eq!(
            config.approvals_path(),
            PathBuf::from("/var/lib/foundry/approvals.json")
        );
    }

    #[test]
    fn test_port_prefers_port_over_api_port() {
        let mut config = FoundryConfig::default();
        config.apply_env(|k| match k {
            "PORT" => Some("8181".to_string()),
            "API_PORT" => Some("9191".to_string()),
            _ => None,
        });
        assert_eq!(config.gateway.port, 8181);
    }

    #[test]
    fn test_validate_rejects_unreachable_target() {
        let mut config = FoundryConfig::default();
        config.build_loop.target_score = 11;
        assert!(matches!(config.validate(), Err(FoundryError::Config(_))));
    }

    #[test]
    fn test_relative_approvals_path_resolves_against_root() {
        let config = FoundryConfig::new().with_project_root("/srv/app");
        assert_eq!(
            config.approvals_path(),
            PathBuf::from("/srv/app/.foundry/approvals.json")
        );
    }
}
