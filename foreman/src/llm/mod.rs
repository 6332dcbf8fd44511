//! LLM client abstraction for the agent loop.
//!
//! The executor depends on one normalized surface: given messages and tool
//! descriptors, a client returns assistant text, the turn's tool calls and
//! any server-executed tool results, regardless of provider wire shape.
//! Implementations: [`AnthropicClient`] (content-block wire),
//! [`OpenAiClient`] (choices/message/tool_calls wire) and [`QueuedLlm`]
//! (scripted FIFO responses for tests). The executor never branches on the
//! provider.

mod anthropic;
mod mock;
mod openai;
pub mod registry;

pub use anthropic::AnthropicClient;
pub use mock::{QueuedLlm, ScriptedResponse};
pub use openai::OpenAiClient;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;
use crate::toolbox::{ServerToolSpec, ToolSpec};

/// One tool invocation extracted from an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments, already JSON-decoded. Fed directly to the toolbox.
    pub input: Value,
    /// Provider block type (`tool_use`, `server_tool_use`, `function`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// True when the provider already executed the tool; its result arrives
    /// in the same response.
    #[serde(default)]
    pub server_executed: bool,
}

/// Result of a server-executed tool, indexed by the originating call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Provider result type (e.g. `web_search_tool_result`).
    pub kind: String,
    pub content: Value,
}

/// Normalized response surface shared by every provider.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Concatenated assistant text, excluding tool blocks.
    pub text_content: String,
    /// Tool invocations in order of appearance.
    pub tool_calls: Vec<ToolCall>,
    /// Server-executed tool results keyed by tool-use id.
    pub tool_results: HashMap<String, ServerToolResult>,
    pub status_code: u16,
}

/// Tool choice mode sent with a completion request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model may answer in text or call tools.
    #[default]
    Auto,
    /// Model must call some tool.
    Any,
    /// Model must call the named tool.
    Tool(String),
}

impl std::str::FromStr for ToolChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "any" | "required" => Ok(Self::Any),
            other => Err(format!("unknown tool_choice: {other} (use auto or any)")),
        }
    }
}

/// Provider failure. `is_retryable` encodes the loop's retry table.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("scripted response queue exhausted")]
    QueueExhausted,
    #[error("no response after {attempts} attempts; last error: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
}

/// Status codes the loop retries with backoff.
const RETRYABLE_STATUS: &[u16] = &[429, 500, 502, 503, 529];
/// Message fragments that mark an error retryable when no status is attached.
const RETRYABLE_INDICATORS: &[&str] = &["overloaded", "rate limit", "529", "503", "429"];

impl LlmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self.status() {
            Some(status) => RETRYABLE_STATUS.contains(&status),
            None => {
                let message = self.to_string().to_lowercase();
                matches!(self, LlmError::Network(_) | LlmError::InvalidResponse(_))
                    && RETRYABLE_INDICATORS.iter().any(|i| message.contains(i))
            }
        }
    }
}

/// A chat-completion client with tool calling.
#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    /// One completion turn: messages in, normalized response out. `messages`
    /// may include a leading system message; clients place it wherever their
    /// wire format wants it.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        server_tools: &[ServerToolSpec],
        tool_choice: Option<&ToolChoice>,
    ) -> Result<LlmResponse, LlmError>;
}
