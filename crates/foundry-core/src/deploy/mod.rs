//! Deployment Manager - instance rollout state machine
//!
//! ```text
//!   spawn ──► Deploying ──► Running ──► (teardown: record removed)
//!                  │
//!                  └──► Failed(reason)   terminal
//! ```
//!
//! Provisioning runs as its own task and reports back through the same
//! table lock as every other mutation. Locks are never held across an
//! `.await`; each operation snapshots the record it needs first.

pub mod fly;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DeploySettings;
use crate::error::{DeployError, FoundryError, Result};

pub use fly::{FlyProvisioner, LoggingRouter};

/// Result of a provisioning or routing step
pub type DeployResult<T> = std::result::Result<T, DeployError>;

/// Lifecycle of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum InstanceStatus {
    Deploying,
    Running,
    Failed(String),
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, InstanceStatus::Failed(_))
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Deploying => f.write_str("deploying"),
            InstanceStatus::Running => f.write_str("running"),
            InstanceStatus::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// A provisioned deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInstance {
    pub id: Uuid,
    /// `<prefix>-<first 8 chars of id>`
    pub name: String,
    pub branch: String,
    pub repo: String,
    pub status: InstanceStatus,
    /// Set once provisioning succeeds
    pub endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Deployment platform operations, called in declaration order
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_app(&self, instance: &DeploymentInstance) -> DeployResult<()>;

    async fn checkout(&self, instance: &DeploymentInstance) -> DeployResult<()>;

    async fn deploy(&self, instance: &DeploymentInstance) -> DeployResult<()>;

    async fn discover_endpoint(&self, instance: &DeploymentInstance) -> DeployResult<String>;

    async fn destroy(&self, instance: &DeploymentInstance) -> DeployResult<()>;
}

/// Points live traffic at an instance
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    async fn route_to(&self, instance: &DeploymentInstance) -> DeployResult<()>;
}

/// Handle returned by [`DeploymentManager::spawn`]
#[derive(Debug)]
pub struct Spawned {
    pub id: Uuid,
    /// Resolves to the final provisioning status. Dropping it detaches the
    /// task; it keeps running.
    pub handle: JoinHandle<InstanceStatus>,
}

/// Result of [`DeploymentManager::cutover`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutover {
    Switched { previous: Option<Uuid> },
    /// Unknown, not running, or the router refused
    Refused,
}

#[derive(Debug, Default)]
struct InstanceTable {
    instances: HashMap<Uuid, DeploymentInstance>,
    live: Option<Uuid>,
}

/// Owns every instance record and the live pointer
pub struct DeploymentManager {
    table: Arc<RwLock<InstanceTable>>,
    provisioner: Arc<dyn Provisioner>,
    router: Arc<dyn TrafficRouter>,
    http: reqwest::Client,
    app_prefix: String,
    health_path: String,
}

impl DeploymentManager {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        router: Arc<dyn TrafficRouter>,
        settings: &DeploySettings,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.health_timeout())
            .build()
            .map_err(|e| FoundryError::Config(format!("health check client: {e}")))?;

        Ok(Self {
            table: Arc::new(RwLock::new(InstanceTable::default())),
            provisioner,
            router,
            http,
            app_prefix: settings.app_prefix.clone(),
            health_path: settings.health_path.clone(),
        })
    }

    /// Register a new instance and start provisioning it in the background
    pub fn spawn(&self, branch: &str, repo: &str) -> Spawned {
        let id = Uuid::new_v4();
        let instance = DeploymentInstance {
            id,
            name: format!("{}-{}", self.app_prefix, &id.to_string()[..8]),
            branch: branch.to_string(),
            repo: repo.to_string(),
            status: InstanceStatus::Deploying,
            endpoint: None,
            created_at: Utc::now(),
        };
        self.table.write().instances.insert(id, instance.clone());
        tracing::info!(instance_id = %id, name = %instance.name, branch, "instance spawned");

        let handle = tokio::spawn(provision(
            Arc::clone(&self.table),
            Arc::clone(&self.provisioner),
            instance,
        ));
        Spawned { id, handle }
    }

    pub fn status(&self, id: Uuid) -> Option<InstanceStatus> {
        self.table.read().instances.get(&id).map(|i| i.status.clone())
    }

    pub fn instance(&self, id: Uuid) -> Option<DeploymentInstance> {
        self.table.read().instances.get(&id).cloned()
    }

    /// All known instances, oldest first
    pub fn instances(&self) -> Vec<DeploymentInstance> {
        let mut all: Vec<_> = self.table.read().instances.values().cloned().collect();
        all.sort_by_key(|i| i.created_at);
        all
    }

    pub fn live_instance(&self) -> Option<DeploymentInstance> {
        let table = self.table.read();
        table.live.and_then(|id| table.instances.get(&id).cloned())
    }

    fn running_endpoint(&self, id: Uuid) -> Option<(DeploymentInstance, String)> {
        let instance = self.instance(id)?;
        if !instance.status.is_running() {
            return None;
        }
        let endpoint = instance.endpoint.clone()?;
        Some((instance, endpoint))
    }

    /// One GET against the health path; healthy only on HTTP 200
    pub async fn health_check(&self, id: Uuid) -> bool {
        let Some((_, endpoint)) = self.running_endpoint(id) else {
            return false;
        };
        let url = format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            self.health_path.trim_start_matches('/')
        );

        match self.http.get(&url).send().await {
            Ok(resp) => {
                let healthy = resp.status() == reqwest::StatusCode::OK;
                tracing::debug!(instance_id = %id, %url, status = resp.status().as_u16(), healthy, "health check");
                healthy
            }
            Err(e) => {
                tracing::debug!(instance_id = %id, %url, error = %e, "health check failed");
                false
            }
        }
    }

    /// Poll [`health_check`](Self::health_check) up to `attempts` times.
    /// Stops early once the instance has failed or disappeared.
    pub async fn wait_until_healthy(&self, id: Uuid, attempts: u32, interval: Duration) -> bool {
        for attempt in 1..=attempts {
            match self.status(id) {
                None | Some(InstanceStatus::Failed(_)) => return false,
                Some(_) => {}
            }
            if self.health_check(id).await {
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::warn!(instance_id = %id, attempts, "instance never became healthy");
        false
    }

    /// Cut live traffic over to a running instance
    pub async fn switch_traffic(&self, id: Uuid) -> bool {
        matches!(self.cutover(id).await, Cutover::Switched { .. })
    }

    /// Like [`switch_traffic`](Self::switch_traffic), also reporting which
    /// instance was live before. The swap of the live pointer is atomic, so
    /// two concurrent cutovers never both see the same predecessor.
    pub async fn cutover(&self, id: Uuid) -> Cutover {
        let Some((instance, _)) = self.running_endpoint(id) else {
            return Cutover::Refused;
        };

        if let Err(e) = self.router.route_to(&instance).await {
            tracing::warn!(instance_id = %id, error = %e, "traffic switch failed");
            return Cutover::Refused;
        }

        let mut table = self.table.write();
        if !table.instances.contains_key(&id) {
            return Cutover::Refused;
        }
        let previous = table.live.replace(id).filter(|prev| *prev != id);
        tracing::info!(instance_id = %id, previous = ?previous, "traffic switched");
        Cutover::Switched { previous }
    }

    /// Destroy an instance. The record is only removed when the platform
    /// confirms.
    pub async fn teardown(&self, id: Uuid) -> bool {
        let Some(instance) = self.instance(id) else {
            return false;
        };

        if let Err(e) = self.provisioner.destroy(&instance).await {
            tracing::warn!(instance_id = %id, name = %instance.name, error = %e, "teardown failed");
            return false;
        }

        let mut table = self.table.write();
        table.instances.remove(&id);
        if table.live == Some(id) {
            table.live = None;
        }
        tracing::info!(instance_id = %id, name = %instance.name, "instance torn down");
        true
    }
}

impl fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("DeploymentManager")
            .field("instances", &table.instances.len())
            .field("live", &table.live)
            .finish()
    }
}

async fn provision(
    table: Arc<RwLock<InstanceTable>>,
    provisioner: Arc<dyn Provisioner>,
    instance: DeploymentInstance,
) -> InstanceStatus {
    let id = instance.id;
    let outcome = run_steps(provisioner.as_ref(), &instance).await;

    let status = match outcome {
        Ok(_) => InstanceStatus::Running,
        Err(ref reason) => InstanceStatus::Failed(reason.clone()),
    };

    let mut table = table.write();
    match table.instances.get_mut(&id) {
        Some(record) => {
            record.status = status.clone();
            if let Ok(endpoint) = outcome {
                record.endpoint = Some(endpoint);
            }
        }
        None => {
            tracing::debug!(instance_id = %id, "instance removed during provisioning, result discarded");
        }
    }
    drop(table);

    match &status {
        InstanceStatus::Failed(reason) => {
            tracing::warn!(instance_id = %id, name = %instance.name, %reason, "provisioning failed")
        }
        _ => tracing::info!(instance_id = %id, name = %instance.name, "instance running"),
    }
    status
}

/// Run the provisioning steps in order, stopping at the first failure
async fn run_steps(
    provisioner: &dyn Provisioner,
    instance: &DeploymentInstance,
) -> std::result::Result<String, String> {
    let fail = |step: &str, e: DeployError| format!("{step}: {e}");

    provisioner
        .create_app(instance)
        .await
        .map_err(|e| fail("create_app", e))?;
    provisioner
        .checkout(instance)
        .await
        .map_err(|e| fail("checkout", e))?;
    provisioner
        .deploy(instance)
        .await
        .map_err(|e| fail("deploy", e))?;
    provisioner
        .discover_endpoint(instance)
        .await
        .map_err(|e| fail("discover_endpoint", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        fail_at: Option<&'static str>,
        destroy_fails: bool,
    }

    impl Recording {
        fn step(&self, step: &'static str) -> DeployResult<()> {
            self.calls.lock().push(step.to_string());
            if self.fail_at == Some(step) {
                return Err(DeployError::StepFailed {
                    step: step.to_string(),
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Provisioner for Recording {
        async fn create_app(&self, _: &DeploymentInstance) -> DeployResult<()> {
            self.step("create_app")
        }
        async fn checkout(&self, _: &DeploymentInstance) -> DeployResult<()> {
            self.step("checkout")
        }
        async fn deploy(&self, _: &DeploymentInstance) -> DeployResult<()> {
            self.step("deploy")
        }
        async fn discover_endpoint(&self, i: &DeploymentInstance) -> DeployResult<String> {
            self.step("discover_endpoint")?;
            Ok(format!("http://{}.invalid", i.name))
        }
        async fn destroy(&self, _: &DeploymentInstance) -> DeployResult<()> {
            if self.destroy_fails {
                return Err(DeployError::StepFailed {
                    step: "destroy".into(),
                    reason: "platform down".into(),
                });
            }
            self.step("destroy")
        }
    }

    fn manager(provisioner: Recording) -> (DeploymentManager, Arc<Recording>) {
        let provisioner = Arc::new(provisioner);
        let manager = DeploymentManager::new(
            provisioner.clone(),
            Arc::new(LoggingRouter),
            &DeploySettings::default(),
        )
        .unwrap();
        (manager, provisioner)
    }

    #[tokio::test]
    async fn test_provisioning_runs_steps_in_order() {
        let (manager, provisioner) = manager(Recording::default());
        let spawned = manager.spawn("main", "https://example.invalid/repo.git");

        assert_eq!(spawned.handle.await.unwrap(), InstanceStatus::Running);
        assert_eq!(
            *provisioner.calls.lock(),
            vec!["create_app", "checkout", "deploy", "discover_endpoint"]
        );

        let instance = manager.instance(spawned.id).unwrap();
        assert!(instance.name.starts_with("foundry-"));
        assert_eq!(instance.name.len(), "foundry-".len() + 8);
        assert!(instance.endpoint.is_some());
    }

    #[tokio::test]
    async fn test_first_failing_step_halts() {
        let (manager, provisioner) = manager(Recording {
            fail_at: Some("checkout"),
            ..Default::default()
        });
        let spawned = manager.spawn("main", "repo");

        let status = spawned.handle.await.unwrap();
        assert!(status.is_failed());
        assert!(status.to_string().contains("checkout"));
        assert_eq!(*provisioner.calls.lock(), vec!["create_app", "checkout"]);
        assert!(manager.instance(spawned.id).unwrap().endpoint.is_none());
        assert!(!manager.switch_traffic(spawned.id).await);
    }

    #[tokio::test]
    async fn test_switch_and_teardown_track_live() {
        let (manager, _) = manager(Recording::default());
        let spawned = manager.spawn("main", "repo");
        spawned.handle.await.unwrap();

        assert!(manager.switch_traffic(spawned.id).await);
        assert_eq!(manager.live_instance().unwrap().id, spawned.id);

        let next = manager.spawn("main", "repo");
        next.handle.await.unwrap();
        assert_eq!(
            manager.cutover(next.id).await,
            Cutover::Switched {
                previous: Some(spawned.id)
            }
        );
        assert!(manager.teardown(next.id).await);
        assert!(manager.live_instance().is_none());

        assert!(manager.teardown(spawned.id).await);
        assert!(manager.live_instance().is_none());
        assert!(manager.instance(spawned.id).is_none());
        assert!(!manager.teardown(spawned.id).await);
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_record() {
        let (manager, _) = manager(Recording {
            destroy_fails: true,
            ..Default::default()
        });
        let spawned = manager.spawn("main", "repo");
        spawned.handle.await.unwrap();

        assert!(!manager.teardown(spawned.id).await);
        assert!(manager.instance(spawned.id).is_some());
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let (manager, _) = manager(Recording::default());
        let id = Uuid::new_v4();
        assert!(!manager.health_check(id).await);
        assert!(!manager.switch_traffic(id).await);
        assert!(!manager.teardown(id).await);
        assert!(!manager.wait_until_healthy(id, 3, Duration::from_millis(1)).await);
        assert!(manager.status(id).is_none());
    }

    #[test]
    fn test_status_serialization() {
        let failed = serde_json::to_value(InstanceStatus::Failed("deploy: boom".into())).unwrap();
        assert_eq!(failed["state"], "failed");
        assert_eq!(failed["reason"], "deploy: boom");
        let running = serde_json::to_value(InstanceStatus::Running).unwrap();
        assert_eq!(running["state"], "running");
    }
}
