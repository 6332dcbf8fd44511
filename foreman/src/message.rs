//! Conversation message types shared by the executor, the LLM clients and the
//! progress logs.
//!
//! A [`Message`] is a `{role, content}` record; `content` is either plain text
//! or a list of typed [`ContentBlock`]s matching the provider wire format:
//! `text`, `tool_use`, `server_tool_use` on assistant turns and `tool_result`
//! on user turns that carry tool outputs back to the model. The first message
//! of any run is always `system`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolCall;

/// Message role. Serialized lowercase on the wire and in progress logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One typed block inside a structured message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ServerToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Message body: plain text (system prompts, user input) or typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of the body (block form joins its text blocks).
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Assistant turn with optional text and the turn's tool invocations as
    /// `tool_use` / `server_tool_use` blocks. Empty or whitespace-only text is
    /// dropped to keep the wire payload valid.
    pub fn assistant(text: &str, tool_calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::new();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            blocks.push(ContentBlock::Text {
                text: trimmed.to_string(),
            });
        }
        for call in tool_calls {
            let block = if call.server_executed {
                ContentBlock::ServerToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                }
            } else {
                ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                }
            };
            blocks.push(block);
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// User turn carrying one or more `tool_result` blocks back to the model.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Builds a single `tool_result` block.
    pub fn tool_result_block(tool_use_id: &str, content: String, is_error: bool) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content,
            is_error,
        }
    }

    /// Serializes into the JSON object stored in progress logs and sent on the wire.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: assistant constructor drops blank text and maps server-executed
    /// calls to `server_tool_use` blocks.
    #[test]
    fn assistant_blocks_from_tool_calls() {
        let calls = vec![
            ToolCall {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: json!({"file_path": "a.py"}),
                kind: Some("tool_use".into()),
                server_executed: false,
            },
            ToolCall {
                id: "srvtoolu_1".into(),
                name: "web_search".into(),
                input: json!({"query": "x"}),
                kind: Some("server_tool_use".into()),
                server_executed: true,
            },
        ];
        let msg = Message::assistant("   ", &calls);
        let MessageContent::Blocks(blocks) = &msg.content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::ToolUse { name, .. } if name == "read_file"));
        assert!(
            matches!(&blocks[1], ContentBlock::ServerToolUse { name, .. } if name == "web_search")
        );
    }

    /// **Scenario**: `tool_result` serialization omits `is_error` when false and
    /// keeps it when true.
    #[test]
    fn tool_result_error_flag_serialization() {
        let ok = Message::tool_result_block("toolu_1", "fine".into(), false);
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("is_error").is_none());

        let err = Message::tool_result_block("toolu_1", "boom".into(), true);
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["is_error"], json!(true));
    }

    /// **Scenario**: messages round-trip through the JSON shape stored in progress logs.
    #[test]
    fn message_roundtrip_through_log_json() {
        let msg = Message::tool_results(vec![Message::tool_result_block(
            "toolu_9",
            "{\"end_task\": true}".into(),
            false,
        )]);
        let v = msg.to_value();
        assert_eq!(v["role"], json!("user"));
        let back: Message = serde_json::from_value(v).unwrap();
        let MessageContent::Blocks(blocks) = back.content else {
            panic!("expected blocks");
        };
        assert!(
            matches!(&blocks[0], ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_9")
        );
    }

    /// **Scenario**: text() flattens block bodies to their text parts only.
    #[test]
    fn content_text_flattens_blocks() {
        let msg = Message::assistant(
            "thinking",
            &[ToolCall {
                id: "t1".into(),
                name: "x".into(),
                input: json!({}),
                kind: None,
                server_executed: false,
            }],
        );
        assert_eq!(msg.content.text(), "thinking");
    }
}
