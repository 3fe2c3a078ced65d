//! Error types for Foundry Core
//!
//! All fallible core operations return [`Result`]. Sub-enums group the
//! errors of the approval gate and the deployment manager; everything else
//! is a flat variant on [`FoundryError`].

use thiserror::Error;

use crate::agent::Role;

/// Result type alias for Foundry operations
pub type Result<T> = std::result::Result<T, FoundryError>;

/// Main error type for Foundry operations
#[derive(Error, Debug)]
pub enum FoundryError {
    /// Invalid input reported straight back to the caller, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Approval gate errors
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Deployment errors
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// A collaborator (planner, builder, refiner) failed
    #[error("Collaborator {role} failed: {message}")]
    Collaborator { role: Role, message: String },

    /// No collaborator registered for a required role
    #[error("Missing capability: no collaborator registered for {0}")]
    MissingCapability(Role),

    /// An operation exceeded its time budget
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// A version-control command failed
    #[error("Source control error: {0}")]
    SourceControl(String),

    /// Sandbox could not be created or used
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<FoundryError>,
    },
}

/// Errors raised by the approval store
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Failed to persist approvals to {path}: {reason}")]
    Persist { path: String, reason: String },

    #[error("Path is forbidden and can never be queued: {0}")]
    Forbidden(String),
}

/// Errors raised while provisioning or routing an instance
#[derive(Error, Debug, Clone)]
pub enum DeployError {
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Command '{command}' exited with {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Traffic switch failed: {0}")]
    SwitchFailed(String),
}

impl FoundryError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<toml::de::Error> for FoundryError {
    fn from(e: toml::de::Error) -> Self {
        FoundryError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for FoundryError {
    fn from(e: toml::ser::Error) -> Self {
        FoundryError::Config(e.to_string())
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
