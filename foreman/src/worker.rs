//! Wrapper entrypoint for a worker child process.
//!
//! `run_worker` is the whole life of one task execution: load the payload,
//! mark it Running, build the right executor for the agent kind, run the
//! loop, and write terminal status plus final output back through the task's
//! live handle. A completed Planner additionally pre-allocates sub-task ids
//! in one batch. Exit-code semantics are advisory — the row's own status is
//! ground truth and the manager reconciles on exit.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::executor::{AgentExecutor, ExecutorConfig, ExecutorError};
use crate::host::RepoHost;
use crate::llm::{registry, LlmClient, LlmError};
use crate::roles::RolePrompt;
use crate::store::{LiveHandle, ProgressLogger, StoreError, TaskStore};
use crate::task::{epoch_seconds, timestamp_now, AgentKind, AgentStatus, TaskPayload};
use crate::toolbox::{
    ServerToolSpec, SiblingAgent, SubAgent, Toolbox, ToolboxConfig, ToolError,
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("toolbox error: {0}")]
    Tool(#[from] ToolError),
}

/// Everything a worker needs besides the task payload itself.
pub struct WorkerOptions {
    pub store: TaskStore,
    pub host: Arc<dyn RepoHost>,
    /// Directory holding workspace settings and repo memory.
    pub state_dir: PathBuf,
    /// Overrides the registry-resolved client (tests inject a scripted LLM).
    pub llm_override: Option<Arc<dyn LlmClient>>,
    pub executor_config: ExecutorConfig,
}

/// The Manager's inline Engineer: a fresh Engineer loop sharing the worker's
/// LLM client and host, logging under its own run id.
struct EngineerSubAgent {
    run_id: String,
    llm: Arc<dyn LlmClient>,
    host: Arc<dyn RepoHost>,
    store: TaskStore,
    state_dir: PathBuf,
    owner: String,
    repo: String,
    branch: Option<String>,
    config: ExecutorConfig,
}

#[async_trait]
impl SubAgent for EngineerSubAgent {
    fn run_id(&self) -> String {
        self.run_id.clone()
    }

    async fn run(&self, description: &str) -> Result<Value, ToolError> {
        let toolbox = Toolbox::new(ToolboxConfig {
            kind: AgentKind::Engineer,
            run_id: self.run_id.clone(),
            owner: self.owner.clone(),
            repos: vec![self.repo.clone()],
            branch: self.branch.clone(),
            host: Arc::clone(&self.host),
            store: self.store.clone(),
            state_dir: self.state_dir.clone(),
            other_agents: Vec::new(),
            server_tools: Vec::new(),
        })?;
        toolbox.authenticate().await?;
        let logger = ProgressLogger::new(&self.store, &self.run_id, Some(&self.run_id))?;
        let prompt = RolePrompt::for_kind(AgentKind::Engineer, &toolbox, &[]);
        let executor = AgentExecutor::new(
            Arc::clone(&self.llm),
            toolbox,
            logger,
            prompt,
            self.config.clone(),
        );
        let state = executor
            .run(description)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        state
            .last_tool_output()
            .map(|entry| entry.tool_output.clone())
            .ok_or_else(|| ToolError::Execution("engineer produced no tool output".to_string()))
    }
}

/// Reads sibling-agent info out of the parent planner's stored output so a
/// sub-task agent knows who else is working the same parent task.
fn sibling_agents(store: &TaskStore, payload: &TaskPayload) -> Vec<SiblingAgent> {
    let (Some(parent_id), Some(my_index)) =
        (payload.parent_fullstack_id.as_deref(), payload.subtask_index)
    else {
        return Vec::new();
    };
    if payload.sibling_subtask_ids.is_empty() {
        return Vec::new();
    }
    let Ok(Some(parent)) = store.get_active_task(parent_id) else {
        return Vec::new();
    };
    let output = parent.get("agent_output").cloned().unwrap_or(Value::Null);
    let subtasks = output
        .get("list_of_subtasks")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let repos = output
        .get("list_of_subtask_repos")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::new();
    for (i, subtask) in subtasks.iter().enumerate() {
        if i == my_index {
            continue;
        }
        let Some(run_id) = payload.sibling_subtask_ids.get(i) else {
            continue;
        };
        out.push(SiblingAgent {
            run_id: run_id.clone(),
            repo: repos
                .get(i)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: subtask.as_str().unwrap_or_default().to_string(),
        });
    }
    out
}

fn merge_status(handle: &LiveHandle, status: AgentStatus, error: Option<String>) {
    handle.update_with(|map| {
        map.insert("agent_status".into(), json!(status.as_str()));
        if let Some(error) = error {
            map.insert("error".into(), json!(error));
        }
        map.insert("updated_at".into(), json!(timestamp_now()));
    });
}

/// Runs one task to its terminal state. Returns `Err` when the task failed,
/// so the process exit code reflects the outcome (advisory only).
pub async fn run_worker(options: WorkerOptions, run_id: &str) -> Result<(), WorkerError> {
    let store = options.store.clone();
    let handle = store
        .task_handle(run_id)?
        .ok_or_else(|| WorkerError::TaskNotFound(run_id.to_string()))?;
    let mut payload = TaskPayload::from_map(&handle.snapshot())
        .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;

    tracing::info!(run_id, kind = %payload.kind, "worker starting task");
    merge_status(&handle, AgentStatus::Running, None);

    match execute(&options, &handle, &mut payload, run_id).await {
        Ok(()) => {
            handle.force_flush()?;
            tracing::info!(run_id, "worker finished task");
            Ok(())
        }
        Err(e) => {
            tracing::error!(run_id, error = %e, "worker failed task");
            merge_status(&handle, AgentStatus::Failed, Some(e.to_string()));
            let _ = handle.force_flush();
            Err(e)
        }
    }
}

async fn execute(
    options: &WorkerOptions,
    handle: &LiveHandle,
    payload: &mut TaskPayload,
    run_id: &str,
) -> Result<(), WorkerError> {
    let store = options.store.clone();

    // Manager/Engineer tasks need a branch before any write; name one from
    // the kind when the submitter left it empty.
    if matches!(payload.kind, AgentKind::Manager | AgentKind::Engineer)
        && payload.branch.is_none()
    {
        let branch = format!("{}-{}", payload.kind.slug(), epoch_seconds());
        payload.branch = Some(branch.clone());
        handle.insert("branch", json!(branch));
    }

    let repos = payload.repo_list();
    if repos.is_empty() {
        return Err(WorkerError::InvalidPayload(
            "task payload names no repositories".to_string(),
        ));
    }

    let llm: Arc<dyn LlmClient> = match &options.llm_override {
        Some(llm) => Arc::clone(llm),
        None => registry::resolve_client(
            payload.model_provider.as_deref(),
            payload.model_name.as_deref(),
        )?,
    };

    let siblings = sibling_agents(&store, payload);
    let server_tools: Vec<ServerToolSpec> = match payload.kind {
        AgentKind::Planner => vec![ServerToolSpec {
            kind: "web_search_20250305".to_string(),
            name: "web_search".to_string(),
            max_uses: Some(5),
        }],
        _ => Vec::new(),
    };

    let toolbox = Toolbox::new(ToolboxConfig {
        kind: payload.kind,
        run_id: run_id.to_string(),
        owner: payload.owner.clone(),
        repos: repos.clone(),
        branch: payload.branch.clone(),
        host: Arc::clone(&options.host),
        store: store.clone(),
        state_dir: options.state_dir.clone(),
        other_agents: siblings.clone(),
        server_tools,
    })?;

    if payload.kind == AgentKind::Manager {
        toolbox.set_sub_agent(Arc::new(EngineerSubAgent {
            run_id: format!("engineer_run_{}", epoch_seconds()),
            llm: Arc::clone(&llm),
            host: Arc::clone(&options.host),
            store: store.clone(),
            state_dir: options.state_dir.clone(),
            owner: payload.owner.clone(),
            repo: repos[0].clone(),
            branch: payload.branch.clone(),
            config: options.executor_config.clone(),
        }));
    }

    toolbox.authenticate().await?;

    let logger = ProgressLogger::new(&store, run_id, Some(run_id))?;
    let prompt = RolePrompt::for_kind(payload.kind, &toolbox, &siblings);
    let executor = AgentExecutor::new(
        llm,
        toolbox,
        logger,
        prompt,
        options.executor_config.clone(),
    );

    let state = executor.run(&payload.description).await?;

    // The final output is the last tool output with its end_task flag cleared.
    let mut final_output = state
        .last_tool_output()
        .map(|entry| entry.tool_output.clone())
        .unwrap_or_else(|| json!({}));
    if let Some(obj) = final_output.as_object_mut() {
        obj.remove("end_task");
    }

    handle.update_with(|map| {
        map.insert("agent_output".into(), final_output.clone());
        map.insert(
            "agent_status".into(),
            json!(AgentStatus::Completed.as_str()),
        );
        map.insert("updated_at".into(), json!(timestamp_now()));
    });

    // A completed Planner pre-allocates ids for its sub-tasks, one batch.
    // Allocation failure is logged, never fatal to the completed task.
    if payload.kind == AgentKind::Planner {
        let count = final_output
            .get("list_of_subtasks")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if count > 0 {
            match store.pre_generate_subtask_ids(run_id, count) {
                Ok(allocations) => {
                    let ids: Vec<String> =
                        allocations.into_iter().map(|a| a.subtask_id).collect();
                    tracing::info!(run_id, count, "pre-allocated subtask ids");
                    handle.insert("subtask_ids", json!(ids));
                }
                Err(e) => {
                    tracing::error!(run_id, error = %e, "subtask id allocation failed");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: sibling extraction skips the task's own index and pairs
    /// each other index with its id, repo and description.
    #[test]
    fn sibling_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();

        let mut parent = TaskPayload::new(
            AgentKind::Planner,
            "fullstack_1",
            "split",
            "acme",
            &["backend".into(), "frontend".into()],
            None,
            None,
        );
        parent.agent_output = {
            let mut m = crate::task::JsonMap::new();
            m.insert("list_of_subtasks".into(), json!(["BE: add /ping", "FE: fetch /ping"]));
            m.insert("list_of_subtask_repos".into(), json!(["backend", "frontend"]));
            m
        };
        store
            .add_active_task("fullstack_1", &parent.to_map())
            .unwrap();

        let mut child = TaskPayload::new(
            AgentKind::Manager,
            "pm_subtask_1_1",
            "FE: fetch /ping",
            "acme",
            &["frontend".into()],
            None,
            None,
        );
        child.parent_fullstack_id = Some("fullstack_1".into());
        child.subtask_index = Some(1);
        child.sibling_subtask_ids =
            vec!["pm_subtask_1_0".into(), "pm_subtask_1_1".into()];

        let siblings = sibling_agents(&store, &child);
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].run_id, "pm_subtask_1_0");
        assert_eq!(siblings[0].repo, "backend");
        assert_eq!(siblings[0].description, "BE: add /ping");
    }

    /// **Scenario**: a missing task row is TaskNotFound, not a panic or a hang.
    #[tokio::test]
    async fn missing_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
        let options = WorkerOptions {
            store,
            host: Arc::new(crate::host::MockRepoHost::new()),
            state_dir: dir.path().join(".foreman"),
            llm_override: None,
            executor_config: ExecutorConfig::default(),
        };
        let err = run_worker(options, "task_missing").await.unwrap_err();
        assert!(matches!(err, WorkerError::TaskNotFound(_)));
    }
}
