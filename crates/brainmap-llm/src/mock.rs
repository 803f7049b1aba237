//! ScriptedProvider - deterministic streaming responses for testing
//!
//! Each call to `complete_stream` pops the next scripted reply. When the
//! script runs out the default reply is used.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream, StructuredProvider};
use crate::structured::ToolUseClient;
use crate::types::{LlmRequest, StreamDelta, ToolChoice};
use async_stream::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Call the forced tool with this input.
    Tool(Value),
    /// Call the forced tool with raw, possibly broken, JSON text.
    Malformed(String),
    /// Answer in prose without calling any tool.
    Text(String),
    /// Fail before streaming.
    Fail(String),
    /// Wait for `release` before producing `reply`.
    Held { release: Arc<Notify>, reply: Box<ScriptedReply> },
}

impl ScriptedReply {
    pub fn held(release: Arc<Notify>, reply: ScriptedReply) -> Self {
        ScriptedReply::Held {
            release,
            reply: Box::new(reply),
        }
    }
}

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    default_reply: ScriptedReply,
    requests: Mutex<Vec<LlmRequest>>,
    entered: Arc<Notify>,
}

impl ScriptedProvider {
    /// Always give the same reply.
    pub fn constant(reply: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: reply,
            requests: Mutex::new(Vec::new()),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Replies consumed in order, then a failure.
    pub fn sequence(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            default_reply: ScriptedReply::Fail("(mock: script exhausted)".into()),
            requests: Mutex::new(Vec::new()),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Wrap in the structured client the agent consumes.
    pub fn structured(self: Arc<Self>, model: &str) -> Arc<dyn StructuredProvider> {
        Arc::new(ToolUseClient::new(self, model))
    }

    pub async fn push(&self, reply: ScriptedReply) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    /// Notified once per call, as soon as the call starts.
    pub fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    async fn next_reply(&self) -> ScriptedReply {
        let mut replies = self.replies.lock().await;
        replies.pop_front().unwrap_or_else(|| self.default_reply.clone())
    }
}

fn forced_tool_name(request: &LlmRequest) -> String {
    match &request.tool_choice {
        Some(ToolChoice::Tool { name }) => name.clone(),
        _ => request
            .tools
            .as_ref()
            .and_then(|tools| tools.first())
            .map(|t| t.name.clone())
            .unwrap_or_else(|| "result".to_string()),
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_stream(&self, request: LlmRequest) -> LlmResult<LlmStream> {
        let tool_name = forced_tool_name(&request);
        self.requests.lock().await.push(request);
        self.entered.notify_one();

        let mut reply = self.next_reply().await;
        let arguments = loop {
            match reply {
                ScriptedReply::Held { release, reply: inner } => {
                    release.notified().await;
                    reply = *inner;
                }
                ScriptedReply::Fail(message) => return Err(LlmError::RequestFailed(message)),
                ScriptedReply::Text(text) => {
                    return Ok(Box::pin(stream! {
                        yield Ok::<_, LlmError>(StreamDelta::Text(text));
                        yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".into()), usage: None });
                    }));
                }
                ScriptedReply::Tool(value) => break serde_json::to_string(&value).unwrap_or_default(),
                ScriptedReply::Malformed(raw) => break raw,
            }
        };

        let id = "toolu_scripted".to_string();
        Ok(Box::pin(stream! {
            yield Ok::<_, LlmError>(StreamDelta::ToolCallStart { id: id.clone(), name: tool_name });
            // Split the input the way a real stream does.
            let chars: Vec<char> = arguments.chars().collect();
            for piece in chars.chunks(16) {
                yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments: piece.iter().collect() });
            }
            yield Ok(StreamDelta::ToolCallEnd { id });
            yield Ok(StreamDelta::Done { stop_reason: Some("tool_use".into()), usage: None });
        }))
    }
}
