//! Loop state: the full message history plus per-round tool bookkeeping.

use std::collections::HashMap;

use serde_json::Value;

use crate::llm::{ServerToolResult, ToolCall};
use crate::message::Message;

/// One executed tool call, recorded for the task's final output and audit.
#[derive(Debug, Clone)]
pub struct ToolOutputEntry {
    pub tool_name: String,
    pub tool_id: String,
    pub tool_input: Value,
    pub tool_output: Value,
    pub timestamp: String,
    pub is_error: bool,
}

/// State carried across the planning/tool-execution cycle.
///
/// `messages` keeps the complete history; only the LLM input is ever
/// truncated. `pending_tool_calls` holds the current assistant turn's
/// not-yet-executed calls; `server_tool_results` accumulates provider-side
/// results so tool execution can pick them up by id.
#[derive(Debug, Default)]
pub struct AgentState {
    pub user_input: String,
    pub messages: Vec<Message>,
    pub pending_tool_calls: Vec<ToolCall>,
    pub most_recent_thought: String,
    pub tool_outputs: Vec<ToolOutputEntry>,
    pub server_tool_results: HashMap<String, ServerToolResult>,
}

impl AgentState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    /// The final tool output of the run, if any tool ever executed.
    pub fn last_tool_output(&self) -> Option<&ToolOutputEntry> {
        self.tool_outputs.last()
    }
}
