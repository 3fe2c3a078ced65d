use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use foundry_core::agent::{AgentOutput, Collaborator, Role, TaskContext};
use foundry_core::error::{FoundryError, Result};
use foundry_core::tools::WriteTool;

use crate::client::ChatClient;
use crate::prompts;

lazy_static! {
    /// ```lang path/to/file
    static ref FILE_FENCE: Regex =
        Regex::new(r"(?ms)^```[A-Za-z0-9_+.-]*[ \t]+([^\s`]+)[ \t]*\r?\n(.*?)^```").unwrap();
}

/// A fenced block that names its target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

/// Fenced blocks carrying a path on the opening fence, in output order
pub fn file_blocks(output: &str) -> Vec<FileBlock> {
    FILE_FENCE
        .captures_iter(output)
        .filter_map(|cap| {
            let path = cap.get(1)?.as_str();
            if !path.contains('/') && !path.contains('.') {
                return None;
            }
            Some(FileBlock {
                path: path.to_string(),
                content: cap.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// A chat model playing one collaborator role
pub struct ChatCollaborator {
    name: String,
    role: Role,
    client: ChatClient,
    files: Option<Arc<WriteTool>>,
}

impl ChatCollaborator {
    pub fn new(role: Role, client: ChatClient) -> Self {
        Self {
            name: format!("chat-{}:{}", role, client.model()),
            role,
            client,
            files: None,
        }
    }

    /// Save fenced file blocks from every reply through `tool`
    pub fn with_write_tool(mut self, tool: Arc<WriteTool>) -> Self {
        self.files = Some(tool);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    async fn persist(&self, tool: &WriteTool, output: &str) -> Vec<String> {
        let mut notes = Vec::new();
        for block in file_blocks(output) {
            match tool.write(&block.path, &block.content).await {
                Ok(outcome) => {
                    tracing::info!(role = %self.role, path = %block.path, %outcome, "file write");
                    notes.push(outcome.to_string());
                }
                Err(e) => {
                    tracing::warn!(role = %self.role, path = %block.path, error = %e, "file write rejected");
                    notes.push(format!("REJECTED: '{}': {}", block.path, e));
                }
            }
        }
        notes
    }
}

#[async_trait]
impl Collaborator for ChatCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, task: &str, context: &TaskContext) -> Result<AgentOutput> {
        let user_prompt = prompts::render_task(task, context);
        let completion = self
            .client
            .complete(prompts::system_prompt(self.role), &user_prompt)
            .await
            .map_err(|e| FoundryError::Collaborator {
                role: self.role,
                message: format!("{e:#}"),
            })?;
        tracing::debug!(role = %self.role, tokens = completion.total_tokens, "completion received");

        let mut output = completion.content;
        if let Some(tool) = &self.files {
            let notes = self.persist(tool, &output).await;
            if !notes.is_empty() {
                output.push_str("\n\n");
                output.push_str(&notes.join("\n"));
            }
        }
        Ok(AgentOutput::new(output))
    }
}
