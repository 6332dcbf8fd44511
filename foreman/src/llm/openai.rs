//! OpenAI-style chat-completions client. Assistant content is plain text;
//! tool invocations ride in `tool_calls` with JSON-encoded arguments.
//! Server-side tools are not modeled on this wire.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolCall, ToolChoice};
use crate::message::{ContentBlock, Message, MessageContent, Role};
use crate::toolbox::{ServerToolSpec, ToolSpec};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Chat-completions client with function calling.
pub struct OpenAiClient {
    model: String,
    api_key: String,
    base_url: String,
    temperature: Option<f64>,
    http: reqwest::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: API_URL.to_string(),
            temperature: None,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Reads the key from `OPENAI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::MissingCredentials("OPENAI_API_KEY".to_string()))?;
        Ok(Self::new(model, key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn tool_choice_value(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::Tool(name) => {
                json!({"type": "function", "function": {"name": name}})
            }
        }
    }
}

/// Converts block-structured messages into the chat-completions shape:
/// tool_use blocks become assistant `tool_calls`, tool_result blocks become
/// `role: tool` messages.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();
    for message in messages {
        match (&message.role, &message.content) {
            (Role::System, content) => {
                wire.push(json!({"role": "system", "content": content.text()}));
            }
            (Role::User, MessageContent::Text(text)) => {
                wire.push(json!({"role": "user", "content": text}));
            }
            (Role::User, MessageContent::Blocks(blocks)) => {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        wire.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                }
            }
            (Role::Assistant, MessageContent::Text(text)) => {
                wire.push(json!({"role": "assistant", "content": text}));
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => text_parts.push(text.clone()),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            },
                        })),
                        // Server-side tools do not exist on this wire.
                        ContentBlock::ServerToolUse { .. } | ContentBlock::ToolResult { .. } => {}
                    }
                }
                let mut msg = json!({"role": "assistant", "content": text_parts.join("")});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                wire.push(msg);
            }
        }
    }
    wire
}

/// Normalizes `choices[0].message` into text and tool calls. Argument strings
/// that fail to decode are preserved under `raw_arguments`.
fn parse_chat_response(body: &Value) -> Result<(String, Vec<ToolCall>), LlmError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let Some(function) = call.get("function") else {
                continue;
            };
            let arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let input = serde_json::from_str(arguments)
                .unwrap_or_else(|_| json!({"raw_arguments": arguments}));
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input,
                kind: Some("function".to_string()),
                server_executed: false,
            });
        }
    }

    Ok((text, tool_calls))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        _server_tools: &[ServerToolSpec],
        tool_choice: Option<&ToolChoice>,
    ) -> Result<LlmResponse, LlmError> {
        let mut payload = json!({
            "model": self.model,
            "messages": wire_messages(messages),
        });
        if let Some(t) = self.temperature {
            payload["temperature"] = json!(t);
        }
        if !tools.is_empty() {
            let functions: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            payload["tools"] = json!(functions);
            if let Some(choice) = tool_choice {
                payload["tool_choice"] = Self::tool_choice_value(choice);
            }
        }

        let response = self
            .http
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let (text_content, tool_calls) = parse_chat_response(&body)?;

        Ok(LlmResponse {
            text_content,
            tool_calls,
            tool_results: Default::default(),
            status_code: status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: tool_calls arguments are JSON-decoded into `input`; broken
    /// argument strings are preserved raw instead of dropped.
    #[test]
    fn parses_tool_calls_with_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "calling tools",
                    "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "read_file", "arguments": "{\"file_path\": \"a.py\"}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "edit_files", "arguments": "not json"}}
                    ]
                }
            }]
        });
        let (text, calls) = parse_chat_response(&body).unwrap();
        assert_eq!(text, "calling tools");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].input["file_path"], json!("a.py"));
        assert_eq!(calls[1].input["raw_arguments"], json!("not json"));
        assert!(!calls[0].server_executed);
    }

    /// **Scenario**: assistant tool_use blocks become `tool_calls`, tool results
    /// become `role: tool` messages.
    #[test]
    fn wire_conversion_round() {
        let calls = vec![ToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            input: json!({"file_path": "a.py"}),
            kind: None,
            server_executed: false,
        }];
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("thinking", &calls),
            Message::tool_results(vec![Message::tool_result_block("call_1", "ok".into(), false)]),
        ];
        let wire = wire_messages(&messages);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], json!("system"));
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], json!("read_file"));
        assert_eq!(wire[3]["role"], json!("tool"));
        assert_eq!(wire[3]["tool_call_id"], json!("call_1"));
    }

    /// **Scenario**: a response without choices is an invalid-response error.
    #[test]
    fn missing_choices_is_invalid() {
        assert!(parse_chat_response(&json!({})).is_err());
    }
}
