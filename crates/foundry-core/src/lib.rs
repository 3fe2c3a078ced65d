//! Foundry Core - engine of an autonomous self-building loop
//!
//! Foundry repeatedly plans, builds, scores, commits and deploys software.
//! The core is four interlocking services:
//!
//! 1. **Scoring** (`scoring`): bounded 0-10 score from static analysis,
//!    security scanning and test execution
//! 2. **Approval guard** (`guard`): forbidden and protected paths, with a
//!    durable queue of human approvals for protected writes
//! 3. **Deployment manager** (`deploy`): spawn, health-check, cut over and
//!    retire deployment instances
//! 4. **Build loop** (`build_loop`): concurrent multi-candidate iterations
//!    tying the above together with the publisher (`publish`)
//!
//! Planning, building and refining are delegated to [`agent::Collaborator`]
//! implementations; the build collaborator persists files only through
//! [`tools::WriteTool`], which consults the guard.
//!
//! # Quick Start
//!
//! ```
//! use foundry_core::build_loop::parse_approaches;
//! use foundry_core::publish::next_version;
//!
//! let approaches = parse_approaches("Add caching\nAdd retry logic\n\n");
//! assert_eq!(approaches.len(), 2);
//!
//! assert_eq!(next_version(Some("v1.2.3")), "v1.2.4");
//! assert_eq!(next_version(None), "v0.0.1");
//! ```
//!
//! Every service is constructed once by the caller and shared as an `Arc`;
//! there are no process-wide singletons.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod build_loop;
pub mod config;
pub mod deploy;
pub mod error;
pub mod guard;
pub mod publish;
pub mod scoring;
pub mod telemetry;
pub mod tools;

pub use agent::{AgentOutput, Agents, Collaborator, CollaboratorRegistry, Role, TaskContext};
pub use build_loop::{BuildLoop, IterationReport, LoopServices, LoopStatus};
pub use config::FoundryConfig;
pub use deploy::{DeploymentInstance, DeploymentManager, InstanceStatus};
pub use error::{FoundryError, Result};
pub use guard::{ApprovalGuard, ApprovalStatus, PendingApproval};
pub use publish::VersionControlPublisher;
pub use scoring::{ScoreBreakdown, ScoringEngine, TestOutcome};
pub use tools::{WriteOutcome, WriteTool};

/// Version of the foundry-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
