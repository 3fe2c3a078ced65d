//! Foundry Agent - chat model collaborators
//!
//! Implements [`foundry_core::Collaborator`] against any OpenAI-compatible
//! `/chat/completions` endpoint. Each role gets its own system prompt; the
//! builder and refiner can save the files they produce through a guarded
//! [`foundry_core::WriteTool`].

#![deny(unsafe_code)]

pub mod client;
pub mod collaborator;
pub mod prompts;

pub use client::{ChatClient, Completion};
pub use collaborator::{file_blocks, ChatCollaborator, FileBlock};

use std::sync::Arc;

use foundry_core::agent::{CollaboratorRegistry, Role};
use foundry_core::config::AgentSettings;
use foundry_core::tools::WriteTool;

/// A registry with one chat collaborator per role, all sharing one client.
/// When `files` is set, builder and refiner output is saved through it.
pub fn registry(settings: &AgentSettings, files: Option<Arc<WriteTool>>) -> CollaboratorRegistry {
    let client = ChatClient::from_settings(settings);
    let mut registry = CollaboratorRegistry::new();
    for role in Role::ALL {
        let mut collaborator = ChatCollaborator::new(role, client.clone());
        if role != Role::Planner {
            if let Some(tool) = &files {
                collaborator = collaborator.with_write_tool(tool.clone());
            }
        }
        registry = registry.register(role, Arc::new(collaborator));
    }
    registry
}
