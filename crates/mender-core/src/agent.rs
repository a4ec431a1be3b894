use anyhow::Result;
use async_trait::async_trait;

/// One reasoning-service request. Diagnosis and fix-generation calls both
/// travel through this shape; the prompt text is what distinguishes them.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Returns the raw response text. The caller expects it to contain
    /// exactly one JSON object, optionally wrapped in a fenced block with
    /// an optional language tag.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
