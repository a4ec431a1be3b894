pub mod anthropic;
pub mod ollama;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
