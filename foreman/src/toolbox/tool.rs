//! The tool trait: one named capability the LLM can invoke.

use async_trait::async_trait;
use serde_json::Value;

use crate::toolbox::ToolError;

/// Descriptor sent to the LLM: name, description and JSON schema for the input.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A provider-side tool executed by the LLM service itself. Declared in the
/// request; its results come back inside the same response.
#[derive(Debug, Clone)]
pub struct ServerToolSpec {
    /// Provider tool type string (e.g. `web_search_20250305`).
    pub kind: String,
    pub name: String,
    pub max_uses: Option<u32>,
}

/// One tool that can be called by the LLM.
///
/// Input arrives as the JSON object the model produced; implementations
/// deserialize into their typed parameter struct and surface malformed input
/// as [`ToolError::InvalidInput`] so the loop can report it back to the model
/// instead of failing the task.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a toolbox.
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Deserializes tool input into a typed parameter struct, mapping failures to
/// the structured error string the loop reports to the model.
pub fn parse_args<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    args: Value,
) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::InvalidInput(format!("invalid input for {tool_name}: {e}")))
}
