//! Batch tool: invoke several other tools in one assistant turn.
//!
//! Children run sequentially through the same dispatcher; a failing child is
//! reported in its slot without aborting the batch. Batch may not invoke
//! itself — nesting stops at depth 1.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::toolbox::{parse_args, Tool, ToolError, ToolSpec, Toolbox};

pub const TOOL_BATCH: &str = "batch_tool";

#[derive(Deserialize)]
struct BatchParams {
    tool_calls: Vec<BatchCall>,
}

#[derive(Deserialize)]
struct BatchCall {
    name: String,
    #[serde(default)]
    args: Value,
}

pub struct BatchTool {
    toolbox: Toolbox,
}

impl BatchTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for BatchTool {
    fn name(&self) -> &str {
        TOOL_BATCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_BATCH.to_string(),
            description: "Invoke multiple other tool calls in one turn. Use this when you \
                          want several results at once (e.g. read two files and list a \
                          directory). Do not nest batch_tool inside batch_tool."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tool_calls": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string", "description": "Tool to invoke."},
                                "args": {"type": "object", "description": "Arguments for the tool."}
                            },
                            "required": ["name"]
                        },
                        "minItems": 1
                    }
                },
                "required": ["tool_calls"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: BatchParams = parse_args(TOOL_BATCH, args)?;
        if params.tool_calls.is_empty() {
            return Err(ToolError::InvalidInput(
                "tool_calls must not be empty".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(params.tool_calls.len());
        for call in params.tool_calls {
            if call.name == TOOL_BATCH {
                results.push(json!({
                    "tool_name": call.name,
                    "error": ToolError::NestedBatch.to_string(),
                }));
                continue;
            }
            let args = if call.args.is_null() {
                json!({})
            } else {
                call.args
            };
            match self.toolbox.dispatch(&call.name, args.clone()).await {
                Ok(result) => results.push(json!({
                    "tool_name": call.name,
                    "tool_args": args,
                    "result": result,
                })),
                Err(e) => results.push(json!({
                    "tool_name": call.name,
                    "tool_args": args,
                    "error": e.to_string(),
                })),
            }
        }
        Ok(Value::Array(results))
    }
}
