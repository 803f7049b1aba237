//! Brainmap LLM - structured-output capability over streaming providers

pub mod anthropic;
pub mod mock;
pub mod provider;
pub mod structured;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{ScriptedProvider, ScriptedReply};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream, StructuredProvider};
pub use structured::{from_config, ToolUseClient};
pub use types::*;
