//! OpenAI-compatible chat-completion client.
//!
//! Used by the wiki and slides adapters to turn retrieved text into an
//! answer. The API key is resolved once at construction; a missing key is
//! reported on the first call so the other adapters keep working.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sourcerouter_shared::{LlmConfig, Result, read_secret};

use crate::error::{AdapterError, AdapterResult};
use crate::http;

/// Sampling settings for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completion client bound to one model.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
}

impl ChatClient {
    /// Client for `{base_url}/chat/completions`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            api_key_env: String::new(),
            model: model.into(),
        })
    }

    /// Client from the `[llm]` config section, key read from its env var.
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Result<Self> {
        let mut client = Self::new(
            &config.base_url,
            read_secret(&config.api_key_env),
            config.model.clone(),
            timeout,
        )?;
        client.api_key_env = config.api_key_env.clone();
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system + user exchange and return the trimmed reply.
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    pub async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        options: CompletionOptions,
    ) -> AdapterResult<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            let var = if self.api_key_env.is_empty() {
                "API key"
            } else {
                self.api_key_env.as_str()
            };
            AdapterError::hard(format!(
                "chat model unavailable: {var} is not set"
            ))
        })?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let parsed: ChatResponse = http::read_json(response, "chat completion").await?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdapterError::hard("chat completion: response had no message content"))?;

        debug!(reply_len = reply.len(), "completion received");
        Ok(reply.trim().to_string())
    }
}
