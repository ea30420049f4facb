//! OpenAI-compatible chat-completions backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::prompt::render_prompt;
use super::{BackendError, GenerationBackend, GenerationRequest};

/// Connection settings for an HTTP generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model used when the expert does not name one.
    pub model: String,
    /// Bearer token. Falls back to `REFINERY_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Bound on a single call, not on the whole loop.
    pub request_timeout_secs: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("REFINERY_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("REFINERY_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string()),
            api_key: std::env::var("REFINERY_API_KEY").ok(),
            request_timeout_secs: 3_600,
        }
    }
}

impl HttpBackendConfig {
    /// Create a new config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Set authentication token.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Backend that posts one user message per generation request.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    name: String,
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, request), fields(backend = %self.name, expert = %request.expert.name, iteration = request.iteration))]
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, BackendError> {
        let prompt = render_prompt(request);
        let model = request.expert.model.as_deref().unwrap_or(&self.config.model);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: request.expert.temperature,
            seed: request.expert.seed,
        };

        let mut call = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(BackendError::EmptyResponse)?;

        debug!(chars = content.len(), model, "generation response received");
        Ok(content)
    }
}
