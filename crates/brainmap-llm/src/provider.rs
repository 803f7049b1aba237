//! LLM provider traits

use crate::types::{LlmRequest, StreamDelta, StructuredTask};
use futures::Stream;
use std::pin::Pin;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// Raw streaming completion backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete_stream(&self, request: LlmRequest) -> LlmResult<LlmStream>;
}

/// The capability the agent consumes: one prompt in, one JSON value matching
/// the task's result shape out.
#[async_trait::async_trait]
pub trait StructuredProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn run_structured_task(&self, task: StructuredTask) -> LlmResult<serde_json::Value>;
}
