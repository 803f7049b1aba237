//! Structured output over tool use.
//!
//! The result shape is offered as the only tool and the model is forced to
//! call it. The streamed tool input is the result.

use crate::anthropic::AnthropicProvider;
use crate::provider::{LlmError, LlmProvider, LlmResult, StructuredProvider};
use crate::types::*;
use brainmap_core::AiConfig;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

pub struct ToolUseClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    log_prompts: bool,
}

impl ToolUseClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            log_prompts: false,
        }
    }

    pub fn with_prompt_logging(mut self, enabled: bool) -> Self {
        self.log_prompts = enabled;
        self
    }

    fn build_request(&self, task: &StructuredTask) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            messages: vec![LlmMessage::user(task.prompt.as_str())],
            tools: Some(vec![LlmTool {
                name: task.shape.name.clone(),
                description: task.shape.description.clone(),
                input_schema: task.shape.schema.clone(),
            }]),
            tool_choice: Some(ToolChoice::Tool {
                name: task.shape.name.clone(),
            }),
            max_tokens: Some(task.sampling.max_tokens),
            temperature: Some(task.sampling.temperature),
            system: Some(task.system.clone()),
        }
    }
}

#[async_trait::async_trait]
impl StructuredProvider for ToolUseClient {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn run_structured_task(&self, task: StructuredTask) -> LlmResult<serde_json::Value> {
        if self.log_prompts {
            debug!(task = %task.name, "prompt:\n{}", task.prompt);
        }

        let request = self.build_request(&task);
        let mut stream = self.provider.complete_stream(request).await?;

        let mut call: Option<AccumulatedToolCall> = None;
        let mut text = String::new();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::ToolCallStart { id, name } => {
                    if name == task.shape.name && call.is_none() {
                        call = Some(AccumulatedToolCall {
                            id,
                            name,
                            arguments: String::new(),
                        });
                    }
                }
                StreamDelta::ToolCallDelta { id, arguments } => {
                    if let Some(c) = call.as_mut().filter(|c| c.id == id) {
                        c.arguments.push_str(&arguments);
                    }
                }
                StreamDelta::Text(t) => text.push_str(&t),
                StreamDelta::Done { .. } => break,
                StreamDelta::ToolCallEnd { .. } => {}
            }
        }

        let call = call.ok_or_else(|| {
            LlmError::InvalidResponse(format!("no '{}' tool call in response", task.shape.name))
        })?;

        if self.log_prompts {
            debug!(task = %task.name, "response: {}", call.arguments);
            if !text.is_empty() {
                debug!(task = %task.name, "response text: {}", text);
            }
        }

        let value = call
            .parse_arguments()
            .map_err(|e| LlmError::InvalidResponse(format!("tool input is not JSON: {}", e)))?;
        if !value.is_object() {
            return Err(LlmError::InvalidResponse("tool input is not an object".into()));
        }
        Ok(value)
    }
}

/// Build the configured capability. The API key is read from the environment.
pub fn from_config(config: &AiConfig) -> LlmResult<Arc<dyn StructuredProvider>> {
    match config.provider.as_str() {
        "anthropic" => {
            let mut provider = AnthropicProvider::from_env()?;
            if let Some(url) = config.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
                provider = provider.with_base_url(url);
            }
            let client = ToolUseClient::new(Arc::new(provider), config.model.clone())
                .with_prompt_logging(config.log_prompts);
            Ok(Arc::new(client))
        }
        other => Err(LlmError::NotConfigured(format!("unknown provider '{}'", other))),
    }
}
