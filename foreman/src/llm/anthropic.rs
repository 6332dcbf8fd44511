//! Anthropic-style messages client: system prompt in its own field, content
//! returned as typed blocks (`text`, `tool_use`, `server_tool_use`,
//! `web_search_tool_result`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, LlmResponse, ServerToolResult, ToolCall, ToolChoice};
use crate::message::{Message, Role};
use crate::toolbox::{ServerToolSpec, ToolSpec};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Direct Anthropic messages-API client with tool calling.
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f64>,
    http: reqwest::Client,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: API_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Reads the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingCredentials("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self::new(model, key))
    }

    /// Overrides the endpoint (local proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn tool_choice_value(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Any => json!({"type": "any"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        }
    }
}

/// Splits the system prompt out of the message list and serializes the rest
/// into wire objects.
fn wire_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = None;
    let mut rest = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system = Some(message.content.text()),
            _ => rest.push(message.to_value()),
        }
    }
    (system, rest)
}

/// Normalizes a response `content` array into text, tool calls and
/// server-side tool results.
fn parse_content_blocks(
    content: &[Value],
) -> (String, Vec<ToolCall>, HashMap<String, ServerToolResult>) {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = HashMap::new();

    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                kind: Some("tool_use".to_string()),
                server_executed: false,
            }),
            Some("server_tool_use") => tool_calls.push(ToolCall {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                kind: Some("server_tool_use".to_string()),
                server_executed: true,
            }),
            Some("web_search_tool_result") => {
                if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                    tool_results.insert(
                        id.to_string(),
                        ServerToolResult {
                            id: Some(id.to_string()),
                            kind: "web_search_tool_result".to_string(),
                            content: block.get("content").cloned().unwrap_or(Value::Null),
                        },
                    );
                }
            }
            _ => {}
        }
    }

    (text_parts.join(""), tool_calls, tool_results)
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        server_tools: &[ServerToolSpec],
        tool_choice: Option<&ToolChoice>,
    ) -> Result<LlmResponse, LlmError> {
        let (system, wire) = wire_messages(messages);

        let mut payload = json!({
            "model": self.model,
            "messages": wire,
            "max_tokens": self.max_tokens,
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if let Some(t) = self.temperature {
            payload["temperature"] = json!(t);
        }

        let mut api_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        for server_tool in server_tools {
            let mut descriptor = json!({
                "type": server_tool.kind,
                "name": server_tool.name,
            });
            if let Some(max_uses) = server_tool.max_uses {
                descriptor["max_uses"] = json!(max_uses);
            }
            api_tools.push(descriptor);
        }
        if !api_tools.is_empty() {
            payload["tools"] = json!(api_tools);
        }
        if let Some(choice) = tool_choice {
            payload["tool_choice"] = Self::tool_choice_value(choice);
        }

        let response = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::InvalidResponse("missing content array".to_string()))?;
        let (text_content, tool_calls, tool_results) = parse_content_blocks(content);

        Ok(LlmResponse {
            text_content,
            tool_calls,
            tool_results,
            status_code: status,
        })
    }
}
