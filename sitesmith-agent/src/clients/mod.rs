use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::memory::{ToolCallRequest, Turn};

mod gemini;
mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAIClient;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What the model wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Invoke a tool. Only the first call of a response is kept.
    ToolCall(ToolCallRequest),
    /// Final (or narrating) text; the loop treats this as terminal.
    Text(String),
}

/// Everything one stateless model call needs.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_instruction: &'a str,
    pub tools: &'a [ToolDefinition],
    pub transcript: &'a [Turn],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub supports_streaming: bool,
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Blocks until the full response is available, even if the transport streams.
    async fn query(&self, request: &ModelRequest<'_>) -> Result<Decision, LLMError>;

    fn model_info(&self) -> ModelInfo;
}

pub fn create_llm_client(
    provider: &str,
    api_key: String,
    model: String,
    base_url: Option<String>,
    timeout: Duration,
) -> Result<Box<dyn LLMClient>, LLMError> {
    match provider {
        "gemini" | "Gemini" => Ok(Box::new(
            GeminiClient::new(api_key, model, base_url).with_timeout(timeout),
        )),
        "openai" | "OpenAI" => Ok(Box::new(
            OpenAIClient::new(api_key, model, base_url).with_timeout(timeout),
        )),
        _ => Err(LLMError::ConfigError(format!("Unknown provider: {}", provider))),
    }
}
