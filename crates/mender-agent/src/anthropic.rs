use anyhow::{Context, Result};
use async_trait::async_trait;
use mender_core::agent::{CompletionRequest, ReasoningBackend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Calls the Anthropic messages API. The default reasoning backend.
pub struct AnthropicBackend {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            model: model.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[async_trait]
impl ReasoningBackend for AnthropicBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![ApiMessage {
                role: "user".into(),
                content: request.prompt.clone(),
            }],
        };

        info!(
            model = %self.model,
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "calling anthropic messages API"
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()?;

        let response = client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "anthropic returned non-200: {body}");
            anyhow::bail!("anthropic error {status}: {body}");
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("failed to parse anthropic response")?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.trim().to_string())
            .unwrap_or_default();

        info!(output_len = text.len(), "anthropic response received");
        Ok(text)
    }
}
