//! Scripted LLM for tests: queued responses consumed FIFO.
//!
//! Exhausting the queue is a hard error — a test-mode client never falls
//! through to a live provider. Scripts can also be loaded from a JSON file so
//! spawned worker processes can run against a fake provider end to end.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolCall, ToolChoice};
use crate::message::Message;
use crate::toolbox::{ServerToolSpec, ToolSpec};

/// One scripted turn: either a normal response or a provider error.
#[derive(Debug)]
pub enum ScriptedResponse {
    Response(LlmResponse),
    Error { status: u16, message: String },
}

impl ScriptedResponse {
    /// Plain assistant text, no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedResponse::Response(LlmResponse {
            text_content: content.into(),
            status_code: 200,
            ..Default::default()
        })
    }

    /// Assistant turn with a single client tool call.
    pub fn tool_use(name: &str, input: Value) -> Self {
        Self::tool_use_with_text("", name, input)
    }

    /// Assistant turn with text and a single client tool call.
    pub fn tool_use_with_text(text: &str, name: &str, input: Value) -> Self {
        ScriptedResponse::Response(LlmResponse {
            text_content: text.to_string(),
            tool_calls: vec![ToolCall {
                id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                name: name.to_string(),
                input,
                kind: Some("tool_use".to_string()),
                server_executed: false,
            }],
            tool_results: HashMap::new(),
            status_code: 200,
        })
    }

    /// Transient provider error with a status code.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        ScriptedResponse::Error {
            status,
            message: message.into(),
        }
    }
}

/// JSON form of a scripted turn, for worker processes driven from a file.
#[derive(Deserialize)]
struct ScriptEntry {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ScriptToolCall>,
    /// Artificial latency before the turn resolves; lets tests catch a
    /// worker while it is still running.
    #[serde(default)]
    delay_ms: Option<u64>,
}

#[derive(Deserialize)]
struct ScriptToolCall {
    name: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug)]
struct QueuedTurn {
    response: ScriptedResponse,
    delay_ms: Option<u64>,
}

/// FIFO scripted client.
#[derive(Debug)]
pub struct QueuedLlm {
    queue: Mutex<VecDeque<QueuedTurn>>,
}

impl QueuedLlm {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            queue: Mutex::new(
                responses
                    .into_iter()
                    .map(|response| QueuedTurn {
                        response,
                        delay_ms: None,
                    })
                    .collect(),
            ),
        }
    }

    /// Loads a script from a JSON array of turns:
    /// `[{"status": 529, "error": "Overloaded"},
    ///   {"text": "...", "tool_calls": [{"name": "...", "input": {...}}]}]`.
    pub fn from_script_file(path: &std::path::Path) -> Result<Self, LlmError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LlmError::InvalidResponse(format!("read script {}: {e}", path.display())))?;
        let entries: Vec<ScriptEntry> = serde_json::from_str(&raw)
            .map_err(|e| LlmError::InvalidResponse(format!("parse script: {e}")))?;

        let queue = entries
            .into_iter()
            .map(|entry| {
                let response = if let Some(error) = entry.error {
                    ScriptedResponse::Error {
                        status: entry.status.unwrap_or(500),
                        message: error,
                    }
                } else {
                    ScriptedResponse::Response(LlmResponse {
                        text_content: entry.text.unwrap_or_default(),
                        tool_calls: entry
                            .tool_calls
                            .into_iter()
                            .map(|tc| ToolCall {
                                id: tc.id.unwrap_or_else(|| {
                                    format!("toolu_{}", uuid::Uuid::new_v4().simple())
                                }),
                                name: tc.name,
                                input: tc.input,
                                kind: Some("tool_use".to_string()),
                                server_executed: false,
                            })
                            .collect(),
                        tool_results: HashMap::new(),
                        status_code: entry.status.unwrap_or(200),
                    })
                };
                QueuedTurn {
                    response,
                    delay_ms: entry.delay_ms,
                }
            })
            .collect();

        Ok(Self {
            queue: Mutex::new(queue),
        })
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for QueuedLlm {
    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
        _server_tools: &[ServerToolSpec],
        _tool_choice: Option<&ToolChoice>,
    ) -> Result<LlmResponse, LlmError> {
        let turn = self
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .ok_or(LlmError::QueueExhausted)?;
        if let Some(delay) = turn.delay_ms {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        match turn.response {
            ScriptedResponse::Response(response) => Ok(response),
            ScriptedResponse::Error { status, message } => {
                Err(LlmError::Api { status, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: responses come back in FIFO order, then exhaustion errors.
    #[tokio::test]
    async fn fifo_then_exhaustion() {
        let llm = QueuedLlm::new(vec![
            ScriptedResponse::text("first"),
            ScriptedResponse::tool_use("read_file", json!({"file_path": "a.py"})),
        ]);
        let r1 = llm.invoke(&[], &[], &[], None).await.unwrap();
        assert_eq!(r1.text_content, "first");
        let r2 = llm.invoke(&[], &[], &[], None).await.unwrap();
        assert_eq!(r2.tool_calls[0].name, "read_file");
        assert!(matches!(
            llm.invoke(&[], &[], &[], None).await,
            Err(LlmError::QueueExhausted)
        ));
    }

    /// **Scenario**: scripted errors surface as API errors with their status.
    #[tokio::test]
    async fn scripted_errors_carry_status() {
        let llm = QueuedLlm::new(vec![ScriptedResponse::error(529, "Overloaded")]);
        let err = llm.invoke(&[], &[], &[], None).await.unwrap_err();
        assert_eq!(err.status(), Some(529));
        assert!(err.is_retryable());
    }

    /// **Scenario**: a script file round-trips errors, text and tool calls.
    #[tokio::test]
    async fn script_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(
            &path,
            r#"[
                {"status": 503, "error": "upstream busy"},
                {"text": "done", "tool_calls": [{"name": "generate_output",
                  "input": {"recommendations": []}, "id": "toolu_fixed"}]}
            ]"#,
        )
        .unwrap();
        let llm = QueuedLlm::from_script_file(&path).unwrap();
        assert_eq!(llm.remaining(), 2);
        assert!(llm.invoke(&[], &[], &[], None).await.is_err());
        let ok = llm.invoke(&[], &[], &[], None).await.unwrap();
        assert_eq!(ok.text_content, "done");
        assert_eq!(ok.tool_calls[0].id, "toolu_fixed");
    }
}
