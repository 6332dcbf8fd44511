//! The terminal tool: `generate_output` validates the role's final output and
//! marks the task done by carrying `end_task=true` in its result, which the
//! loop's termination predicate picks up from the tool_result message.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::task::AgentKind;
use crate::toolbox::{Tool, ToolError, ToolSpec};

pub const TOOL_GENERATE_OUTPUT: &str = "generate_output";

pub struct GenerateOutputTool {
    kind: AgentKind,
}

impl GenerateOutputTool {
    pub fn new(kind: AgentKind) -> Self {
        Self { kind }
    }

    fn schema(&self) -> Value {
        match self.kind {
            AgentKind::Planner => json!({
                "type": "object",
                "properties": {
                    "summary_of_the_problem": {"type": "string"},
                    "response_to_the_question": {"type": "string"},
                    "most_relevant_code_file_paths": {"type": "array", "items": {"type": "string"}},
                    "list_of_subtasks": {"type": "array", "items": {"type": "string"},
                        "description": "Detailed description of each subtask."},
                    "list_of_subtask_titles": {"type": "array", "items": {"type": "string"}},
                    "list_of_subtask_repos": {"type": "array", "items": {"type": "string"},
                        "description": "Repository each subtask should be done in."},
                    "assessment_of_difficulty": {"type": "string"},
                    "assessment_of_subtask_difficulty": {"type": "array", "items": {"type": "string"}},
                    "assessment_of_subtask_assignment": {"type": "array", "items": {"type": "string"}},
                    "recommended_approach": {"type": "string"}
                },
                "required": ["summary_of_the_problem"]
            }),
            AgentKind::Manager => json!({
                "type": "object",
                "properties": {
                    "recommendations": {"type": "array", "items": {"type": "string"}},
                    "issues_encountered": {"type": "array", "items": {"type": "string"}},
                    "pull_request_message": {"type": "string"},
                    "pr_url": {"type": "string"}
                },
                "required": ["recommendations", "issues_encountered", "pull_request_message"]
            }),
            AgentKind::Engineer => json!({
                "type": "object",
                "properties": {
                    "summary_of_changes": {"type": "string"},
                    "files_modified": {"type": "array", "items": {"type": "string"}},
                    "verification_status": {"type": "boolean"},
                    "error_messages": {"type": "array", "items": {"type": "string"}},
                    "additional_notes": {"type": "string"},
                    "pr_url": {"type": "string"}
                },
                "required": ["summary_of_changes", "files_modified", "verification_status"]
            }),
        }
    }
}

#[async_trait]
impl Tool for GenerateOutputTool {
    fn name(&self) -> &str {
        TOOL_GENERATE_OUTPUT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GENERATE_OUTPUT.to_string(),
            description: "Produce the final structured output for this task and end it. Call \
                          this exactly once, when the work is complete."
                .to_string(),
            input_schema: self.schema(),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        self.kind
            .validate_output(&args)
            .map_err(|e| ToolError::InvalidInput(format!("output does not validate: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a valid engineer output comes back with end_task=true; an
    /// invalid one is an InvalidInput the loop reports to the model.
    #[tokio::test]
    async fn engineer_output_validation() {
        let tool = GenerateOutputTool::new(AgentKind::Engineer);
        let out = tool
            .call(json!({
                "summary_of_changes": "added /ping",
                "files_modified": ["svc/routes.py"],
                "verification_status": true
            }))
            .await
            .unwrap();
        assert_eq!(out["end_task"], json!(true));

        let err = tool.call(json!({"summary_of_changes": "x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    /// **Scenario**: planner output accepts the decomposition lists.
    #[tokio::test]
    async fn planner_output_validation() {
        let tool = GenerateOutputTool::new(AgentKind::Planner);
        let out = tool
            .call(json!({
                "summary_of_the_problem": "needs /ping end to end",
                "list_of_subtasks": ["BE: add /ping", "FE: fetch /ping"],
                "list_of_subtask_repos": ["backend", "frontend"]
            }))
            .await
            .unwrap();
        assert_eq!(out["end_task"], json!(true));
        assert_eq!(out["list_of_subtasks"].as_array().unwrap().len(), 2);
    }
}
