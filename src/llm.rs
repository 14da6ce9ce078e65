//! Chat-completion backend for the generation stage.
//!
//! [`ChatBackend`] is the seam the generator talks to. The production
//! implementation speaks the OpenAI-compatible `/chat/completions` protocol;
//! tests substitute an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;
use crate::util::preview;

/// Longest slice of an error response body kept in the error.
const MAX_ERROR_BODY: usize = 500;

/// Abstraction over a single-turn text generation call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
    }
}

/// OpenAI-compatible chat client.
pub struct OpenAiChatClient {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: String, model: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            timeout,
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", user)],
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Service {
                status: status.as_u16(),
                body: preview(&body, MAX_ERROR_BODY).to_string(),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| classify(e, self.timeout))?;
        parsed.into_text().ok_or(GenerationError::EmptyResponse)
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        GenerationError::Transport(err)
    }
}
