use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use foundry_core::config::AgentSettings;

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire
/// format (OpenAI, OpenRouter, vLLM, Ollama, ...)
#[derive(Debug, Clone)]
pub struct ChatClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

/// Text of the first choice plus token accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub total_tokens: u32,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.1,
            max_tokens: 4096,
            headers: HashMap::new(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(&settings.base_url, &settings.model)
            .with_api_key(settings.api_key.clone())
            .with_temperature(settings.temperature)
            .with_max_tokens(settings.max_tokens)
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request(&self, system_prompt: &str, user_prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        }
    }

    /// One system + user exchange
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let request = self.request(system_prompt, user_prompt);

        let mut builder = self
            .http_client
            .post(self.endpoint())
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read chat completion body")?;
        if !status.is_success() {
            anyhow::bail!("chat completion API error ({}): {}", status, body);
        }

        parse_completion(&body)
    }
}

pub(crate) fn parse_completion(body: &str) -> Result<Completion> {
    let completion: ChatCompletionResponse =
        serde_json::from_str(body).context("Failed to parse chat completion response")?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .context("chat completion contained no choices")?;

    let total_tokens = completion
        .usage
        .as_ref()
        .and_then(|u| u.total_tokens)
        .unwrap_or(0);

    Ok(Completion {
        content,
        total_tokens,
    })
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    total_tokens: Option<u32>,
}
