//! Delegation: the Manager hands a described task to its inline Engineer.
//!
//! The delegated run gets its own task row (created Running, since the
//! engineer executes inside this same worker process) and its own progress
//! log, the parent records the child in `child_run_ids`, and the engineer's
//! final output is returned as the tool result with `end_task` cleared so a
//! delegation can never terminate the manager's own loop.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::task::{timestamp_now, AgentKind, AgentStatus, TaskPayload};
use crate::toolbox::{parse_args, Tool, ToolError, ToolSpec, Toolbox};

pub const TOOL_DELEGATE_TASK: &str = "delegate_task";

#[derive(serde::Deserialize)]
struct DelegateParams {
    task: String,
}

pub struct DelegateTaskTool {
    toolbox: Toolbox,
}

impl DelegateTaskTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        TOOL_DELEGATE_TASK
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_DELEGATE_TASK.to_string(),
            description: "Delegate a concrete implementation task to the software engineer \
                          agent. Input is a detailed description including relevant file \
                          paths. Returns the engineer's summary of changes, files modified \
                          and verification status."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Detailed task description."}
                },
                "required": ["task"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: DelegateParams = parse_args(TOOL_DELEGATE_TASK, args)?;
        let sub_agent = self.toolbox.sub_agent().ok_or_else(|| {
            ToolError::Execution("engineer sub-agent not initialized".to_string())
        })?;

        let child_run_id = sub_agent.run_id();
        let parent_run_id = self.toolbox.run_id().to_string();
        let store = self.toolbox.store().clone();
        let repo = self.toolbox.current_repo();

        // Child row is created Running: the engineer executes inline, there is
        // no separate process to queue for.
        let mut child = TaskPayload::new(
            AgentKind::Engineer,
            &child_run_id,
            &params.task,
            self.toolbox.owner(),
            &[repo],
            None,
            None,
        );
        child.status = AgentStatus::Running;
        child.branch = self.toolbox.branch();
        child.parent_fullstack_id = Some(parent_run_id.clone());
        let child_handle = store.create_task_handle(&child_run_id, child.to_map())?;

        // Record the child on the parent row.
        if let Some(parent_handle) = store.task_handle(&parent_run_id)? {
            parent_handle.update_with(|map| {
                let children = map
                    .entry("child_run_ids".to_string())
                    .or_insert_with(|| json!([]));
                if let Some(list) = children.as_array_mut() {
                    if !list.iter().any(|v| v == &json!(child_run_id)) {
                        list.push(json!(child_run_id));
                    }
                }
                map.insert("updated_at".to_string(), json!(timestamp_now()));
            });
        }

        tracing::info!(
            parent = %parent_run_id,
            child = %child_run_id,
            "delegating task to engineer"
        );

        match sub_agent.run(&params.task).await {
            Ok(mut output) => {
                // A delegation result must not end the manager's task.
                if let Some(obj) = output.as_object_mut() {
                    obj.insert("end_task".to_string(), json!(false));
                }
                child_handle.merge({
                    let mut m = crate::task::JsonMap::new();
                    m.insert("agent_status".into(), json!(AgentStatus::Completed.as_str()));
                    m.insert("agent_output".into(), output.clone());
                    m.insert("updated_at".into(), json!(timestamp_now()));
                    m
                });
                child_handle.force_flush()?;
                Ok(output)
            }
            Err(e) => {
                child_handle.merge({
                    let mut m = crate::task::JsonMap::new();
                    m.insert("agent_status".into(), json!(AgentStatus::Failed.as_str()));
                    m.insert("error".into(), json!(e.to_string()));
                    m.insert("updated_at".into(), json!(timestamp_now()));
                    m
                });
                let _ = child_handle.force_flush();
                Ok(json!({
                    "summary_of_changes": format!("Error delegating task: {e}"),
                    "files_modified": [],
                    "verification_status": false,
                    "error_messages": [e.to_string()],
                    "additional_notes": "The software engineer agent failed; decide whether to retry or adjust the task.",
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolbox::test_support::toolbox_fixture;
    use crate::toolbox::SubAgent;
    use std::sync::Arc;

    struct FixedEngineer {
        fail: bool,
    }

    #[async_trait]
    impl SubAgent for FixedEngineer {
        fn run_id(&self) -> String {
            "engineer_run_42".to_string()
        }

        async fn run(&self, description: &str) -> Result<Value, ToolError> {
            if self.fail {
                return Err(ToolError::Execution("engineer exploded".to_string()));
            }
            Ok(json!({
                "summary_of_changes": format!("did: {description}"),
                "files_modified": ["svc/routes.py"],
                "verification_status": true,
                "end_task": true
            }))
        }
    }

    /// **Scenario**: delegation creates the child row, links it on the parent,
    /// and clears end_task on the returned output.
    #[tokio::test]
    async fn delegation_creates_child_and_clears_end_task() {
        let (_dir, toolbox) = toolbox_fixture(AgentKind::Manager, &["svc"]);
        let store = toolbox.store().clone();
        // Parent row for child linkage.
        let parent = TaskPayload::new(
            AgentKind::Manager,
            "run_test",
            "coordinate",
            "acme",
            &["svc".to_string()],
            None,
            None,
        );
        store.add_active_task("run_test", &parent.to_map()).unwrap();
        toolbox.set_sub_agent(Arc::new(FixedEngineer { fail: false }));

        let out = toolbox
            .dispatch(TOOL_DELEGATE_TASK, json!({"task": "add /ping"}))
            .await
            .unwrap();
        assert_eq!(out["end_task"], json!(false));
        assert_eq!(out["files_modified"], json!(["svc/routes.py"]));

        let child = store.get_active_task("engineer_run_42").unwrap().unwrap();
        assert_eq!(child["agent_status"], json!("Completed"));
        assert_eq!(child["parent_fullstack_id"], json!("run_test"));

        let parent_row = store.get_active_task("run_test").unwrap().unwrap();
        assert_eq!(parent_row["child_run_ids"], json!(["engineer_run_42"]));
    }

    /// **Scenario**: a failing engineer yields an error-shaped result (so the
    /// manager's loop can adapt) and a Failed child row.
    #[tokio::test]
    async fn delegation_failure_is_reported_not_raised() {
        let (_dir, toolbox) = toolbox_fixture(AgentKind::Manager, &["svc"]);
        toolbox.set_sub_agent(Arc::new(FixedEngineer { fail: true }));

        let out = toolbox
            .dispatch(TOOL_DELEGATE_TASK, json!({"task": "add /ping"}))
            .await
            .unwrap();
        assert_eq!(out["verification_status"], json!(false));
        assert!(out["error_messages"][0]
            .as_str()
            .unwrap()
            .contains("engineer exploded"));

        let store = toolbox.store();
        let child = store.get_active_task("engineer_run_42").unwrap().unwrap();
        assert_eq!(child["agent_status"], json!("Failed"));
    }

    /// **Scenario**: delegation without an installed sub-agent is an execution error.
    #[tokio::test]
    async fn missing_sub_agent() {
        let (_dir, toolbox) = toolbox_fixture(AgentKind::Manager, &["svc"]);
        let err = toolbox
            .dispatch(TOOL_DELEGATE_TASK, json!({"task": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }
}
