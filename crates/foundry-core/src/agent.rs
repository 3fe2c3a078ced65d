//! Collaborator contract and typed registry
//!
//! Planning, building and refining are delegated to external agents that
//! turn a task description into text. The core only sees the
//! [`Collaborator`] trait; concrete clients live in other crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FoundryError, Result};

/// Role a collaborator plays in the build loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Builder,
    Refiner,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Planner, Role::Builder, Role::Refiner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Builder => "builder",
            Role::Refiner => "refiner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form key/value context passed alongside a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext(BTreeMap<String, String>);

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a collaborator returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: String,
}

impl AgentOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// An external agent. Implementations must be safe to call concurrently
/// for independent tasks.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Human readable name, used in logs
    fn name(&self) -> &str;

    async fn invoke(&self, task: &str, context: &TaskContext) -> Result<AgentOutput>;
}

/// Invoke a collaborator with a hard deadline.
///
/// Collaborators are not trusted to return on their own, so every call
/// from the loop goes through here.
pub async fn invoke_with_timeout(
    collaborator: &dyn Collaborator,
    role: Role,
    task: &str,
    context: &TaskContext,
    timeout: Duration,
) -> Result<AgentOutput> {
    match tokio::time::timeout(timeout, collaborator.invoke(task, context)).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(FoundryError::Collaborator {
            role,
            message: e.to_string(),
        }),
        Err(_) => Err(FoundryError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Role-to-collaborator registry, populated at startup
#[derive(Default, Clone)]
pub struct CollaboratorRegistry {
    entries: HashMap<Role, Arc<dyn Collaborator>>,
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the collaborator for a role
    pub fn register(mut self, role: Role, collaborator: Arc<dyn Collaborator>) -> Self {
        self.entries.insert(role, collaborator);
        self
    }

    /// Register one collaborator for every role
    pub fn register_all(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        for role in Role::ALL {
            self.entries.insert(role, collaborator.clone());
        }
        self
    }

    pub fn get(&self, role: Role) -> Option<Arc<dyn Collaborator>> {
        self.entries.get(&role).cloned()
    }

    /// Resolve every role the loop needs, failing on the first missing one
    pub fn resolve(&self) -> Result<Agents> {
        let take = |role: Role| self.get(role).ok_or(FoundryError::MissingCapability(role));
        Ok(Agents {
            planner: take(Role::Planner)?,
            builder: take(Role::Builder)?,
            refiner: take(Role::Refiner)?,
        })
    }
}

impl fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .entries
            .iter()
            .map(|(role, c)| format!("{}={}", role, c.name()))
            .collect();
        names.sort();
        f.debug_struct("CollaboratorRegistry")
            .field("entries", &names)
            .finish()
    }
}

/// Resolved collaborators, one per role
#[derive(Clone)]
pub struct Agents {
    pub planner: Arc<dyn Collaborator>,
    pub builder: Arc<dyn Collaborator>,
    pub refiner: Arc<dyn Collaborator>,
}

impl Agents {
    pub fn for_role(&self, role: Role) -> &Arc<dyn Collaborator> {
        match role {
            Role::Planner => &self.planner,
            Role::Builder => &self.builder,
            Role::Refiner => &self.refiner,
        }
    }
}
