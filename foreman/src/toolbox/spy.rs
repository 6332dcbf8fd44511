//! spy_on_agent: read another run's progress log through the store.
//!
//! Lets a sub-task agent see what a sibling (e.g. the backend half of a
//! fullstack change) has done so far. Without a run id it lists the engineer
//! runs currently in the store. Pagination counts from the most recent
//! messages backwards: page 1 is the newest slice.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::toolbox::{parse_args, Tool, ToolError, ToolSpec, Toolbox};

pub const TOOL_SPY_ON_AGENT: &str = "spy_on_agent";

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(serde::Deserialize)]
struct SpyParams {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

pub struct SpyOnAgentTool {
    toolbox: Toolbox,
}

impl SpyOnAgentTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn list_available_agents(&self) -> Result<Value, ToolError> {
        let mut available = Vec::new();
        for (task_id, payload) in self.toolbox.store().get_all_active_tasks()? {
            if payload.get("agent_type").and_then(Value::as_str) == Some("Engineer") {
                available.push(json!({
                    "run_id": task_id,
                    "description": payload.get("description").cloned().unwrap_or(Value::Null),
                    "status": payload.get("agent_status").cloned().unwrap_or(Value::Null),
                    "created_at": payload.get("created_at").cloned().unwrap_or(Value::Null),
                }));
            }
        }
        Ok(json!({
            "success": true,
            "message": "No run_id provided. Here are the available agents:",
            "available_agents": available,
            "available_other_agents": self.toolbox.other_agents(),
        }))
    }

    /// Collects the run's progress entries, following `child_run_ids` when the
    /// run itself has no logs yet (a parent whose work happened in children).
    fn collect_progress(&self, run_id: &str) -> Result<Vec<Value>, ToolError> {
        let store = self.toolbox.store();
        let mut logs = store.get_all_logs_for_run(run_id)?;
        if logs.is_empty() {
            if let Some(parent) = store.get_active_task(run_id)? {
                if let Some(children) = parent.get("child_run_ids").and_then(Value::as_array) {
                    for child in children.iter().filter_map(Value::as_str) {
                        logs.extend(store.get_all_logs_for_run(child)?);
                    }
                }
            }
        }
        let mut progress = Vec::new();
        for record in logs {
            if let Some(Value::Array(items)) = record.log_data.get("progress") {
                progress.extend(items.iter().cloned());
            }
        }
        Ok(progress)
    }
}

#[async_trait]
impl Tool for SpyOnAgentTool {
    fn name(&self) -> &str {
        TOOL_SPY_ON_AGENT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SPY_ON_AGENT.to_string(),
            description: "See the progress log of an agent working on a related task. Call \
                          with no arguments to list available agents. If the other agent has \
                          not started yet you will get no logs; proceed on your own \
                          assumptions in that case."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "run_id": {"type": "string", "description": "Run to spy on."},
                    "page": {"type": "integer", "description": "1 = most recent page."},
                    "page_size": {"type": "integer"}
                }
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: SpyParams = parse_args(TOOL_SPY_ON_AGENT, args)?;
        let Some(run_id) = params.run_id else {
            return self.list_available_agents();
        };

        let progress = self.collect_progress(&run_id)?;
        if progress.is_empty() {
            return Ok(json!({
                "success": false,
                "error_messages": ["Agent not found or not started yet. Proceed without it or check back later."],
                "available_other_agents": self.toolbox.other_agents(),
            }));
        }

        let page = params.page.unwrap_or(1).max(1);
        let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let total_logs = progress.len();
        let total_pages = total_logs.div_ceil(page_size).max(1);

        // Page 1 is the most recent slice.
        let end = total_logs.saturating_sub((page - 1) * page_size);
        let start = end.saturating_sub(page_size);
        let formatted: Vec<Value> = progress[start..end]
            .iter()
            .filter(|entry| {
                !matches!(
                    entry.get("role").and_then(Value::as_str),
                    Some("system") | None
                )
            })
            .map(|entry| {
                json!({
                    "role": entry.get("role").cloned().unwrap_or(Value::Null),
                    "content": entry.get("content").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "logs_by_agent_id": {run_id: formatted},
            "available_other_agents": self.toolbox.other_agents(),
            "pagination": {
                "total_logs": total_logs,
                "current_page": page,
                "total_pages": total_pages,
                "has_next": page < total_pages,
                "has_prev": page > 1,
            },
        }))
    }
}
