//! Worker manager: creates tasks, spawns one child process per task,
//! supervises lifecycles and reconciles terminal status.
//!
//! The in-memory `run_id → child` table is purely supervisory; task identity
//! lives in the store, which both sides of the process boundary share. The
//! monitor polls children at 1 Hz; a child exit only overwrites the row's
//! status when the row still reads `Running` — a worker that already wrote
//! its terminal status wins.

pub mod child;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::store::{LiveHandle, StoreError, TaskStore};
use crate::task::{epoch_seconds, timestamp_now, AgentKind, AgentStatus, TaskPayload};
use child::ChildProcess;

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no repositories selected for task")]
    NoRepos,
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("worker spawn failed: {0}")]
    Spawn(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses `CONNECTED_REPOS` (`owner/repo,owner/repo2`) into pairs; malformed
/// entries are logged and skipped.
pub fn parse_connected_repos(raw: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
                out.push((owner.to_string(), repo.to_string()));
            }
            _ => tracing::warn!(entry, "invalid CONNECTED_REPOS entry"),
        }
    }
    out
}

/// Construction parameters for [`WorkerManager`].
pub struct ManagerConfig {
    pub store: TaskStore,
    /// `(owner, repo)` pairs tasks may target.
    pub connected_repos: Vec<(String, String)>,
    /// Directory for per-run child output logs.
    pub logs_dir: PathBuf,
    /// Path to the `foreman-worker` binary.
    pub worker_exe: PathBuf,
}

/// Resolves the worker binary next to the current executable.
pub fn default_worker_exe() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| std::io::Error::other("current_exe has no parent"))?;
    Ok(dir.join("foreman-worker"))
}

pub struct WorkerManager {
    store: TaskStore,
    owner: String,
    connected_repos: Vec<(String, String)>,
    logs_dir: PathBuf,
    worker_exe: PathBuf,
    children: Mutex<HashMap<String, ChildProcess>>,
    handles: Mutex<HashMap<String, LiveHandle>>,
}

impl WorkerManager {
    /// The owner is taken from the first connected repo (all repos are
    /// expected to share one).
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        let owner = config
            .connected_repos
            .first()
            .map(|(owner, _)| owner.clone())
            .unwrap_or_else(|| "unknown".to_string());
        std::fs::create_dir_all(&config.logs_dir)?;
        tracing::info!(
            %owner,
            repos = config.connected_repos.len(),
            "worker manager initialized"
        );
        Ok(Self {
            store: config.store,
            owner,
            connected_repos: config.connected_repos,
            logs_dir: config.logs_dir,
            worker_exe: config.worker_exe,
            children: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn connected_repos(&self) -> &[(String, String)] {
        &self.connected_repos
    }

    /// Records an operator-level note in the debug ring, `[HH:MM:SS]`-stamped.
    pub fn add_debug_message(&self, message: &str) {
        let stamped = format!(
            "[{}] {message}",
            chrono::Local::now().format("%H:%M:%S")
        );
        if let Err(e) = self.store.add_debug_message(&stamped) {
            tracing::warn!(error = %e, "debug message not recorded");
        }
        tracing::debug!("{message}");
    }

    fn lock_children(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChildProcess>> {
        self.children.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fresh run id; epoch-based, disambiguated so an id is never reused even
    /// within one second.
    fn generate_run_id(&self) -> Result<String, ManagerError> {
        let epoch = epoch_seconds();
        let base = format!("task_{epoch}");
        if self.store.get_active_task(&base)?.is_none() {
            return Ok(base);
        }
        for n in 1.. {
            let candidate = format!("task_{epoch}_{n}");
            if self.store.get_active_task(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        unreachable!()
    }

    /// Creates the task row (visible to other readers before any child
    /// exists), then spawns the worker. Spawn failure marks the row Failed;
    /// the run id is returned either way.
    pub fn create_task(
        &self,
        kind: AgentKind,
        description: &str,
        repos: &[String],
        model_provider: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<String, ManagerError> {
        if repos.is_empty() {
            return Err(ManagerError::NoRepos);
        }
        let run_id = self.generate_run_id()?;
        self.add_debug_message(&format!(
            "creating {kind} task {run_id} for repos {repos:?}"
        ));

        let payload = TaskPayload::new(
            kind,
            &run_id,
            description,
            &self.owner,
            repos,
            model_provider,
            model_name,
        );
        let handle = self.store.create_task_handle(&run_id, payload.to_map())?;
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(run_id.clone(), handle.clone());

        match self.spawn_child(&run_id) {
            Ok(()) => {
                self.add_debug_message(&format!("started worker process for {run_id}"));
            }
            Err(e) => {
                tracing::error!(%run_id, error = %e, "worker spawn failed");
                handle.merge({
                    let mut m = crate::task::JsonMap::new();
                    m.insert(
                        "agent_status".into(),
                        json!(AgentStatus::Failed.as_str()),
                    );
                    m.insert("error".into(), json!(format!("worker spawn failed: {e}")));
                    m.insert("updated_at".into(), json!(timestamp_now()));
                    m
                });
                let _ = handle.force_flush();
                self.add_debug_message(&format!("failed to start worker for {run_id}: {e}"));
            }
        }
        Ok(run_id)
    }

    /// Creates a Manager task for one item of a completed planner's
    /// decomposition. The run id prefers the pre-allocated sub-task id for
    /// this index (so retried submissions stay idempotent), the payload
    /// carries the sibling bookkeeping, and the parent moves to
    /// `Subtasks Running`.
    pub fn create_subtask_task(
        &self,
        parent_run_id: &str,
        subtask_index: usize,
        model_provider: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<String, ManagerError> {
        let parent = self
            .store
            .get_active_task(parent_run_id)?
            .ok_or_else(|| ManagerError::TaskNotFound(parent_run_id.to_string()))?;
        let output = parent
            .get("agent_output")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let subtasks = output
            .get("list_of_subtasks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let description = subtasks
            .get(subtask_index)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ManagerError::InvalidPayload(format!(
                    "planner {parent_run_id} has no subtask at index {subtask_index}"
                ))
            })?
            .to_string();
        let repo = output
            .get("list_of_subtask_repos")
            .and_then(|v| v.as_array())
            .and_then(|repos| repos.get(subtask_index))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ManagerError::InvalidPayload(format!(
                    "planner {parent_run_id} names no repo for subtask {subtask_index}"
                ))
            })?
            .to_string();
        let title = output
            .get("list_of_subtask_titles")
            .and_then(|v| v.as_array())
            .and_then(|titles| titles.get(subtask_index))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        // Prefer the id the planner's completion pre-allocated for this index.
        let run_id = match self.store.get_subtask_id(parent_run_id, subtask_index)? {
            Some(id) => id,
            None => self.generate_run_id()?,
        };
        if self.store.get_active_task(&run_id)?.is_some() {
            // Idempotent retry: the sub-task row already exists.
            return Ok(run_id);
        }

        let sibling_ids: Vec<String> = self
            .store
            .get_subtask_ids(parent_run_id)?
            .into_iter()
            .map(|a| a.subtask_id)
            .collect();

        let mut payload = TaskPayload::new(
            AgentKind::Manager,
            &run_id,
            &description,
            &self.owner,
            &[repo],
            model_provider,
            model_name,
        );
        payload.title = title;
        payload.parent_fullstack_id = Some(parent_run_id.to_string());
        payload.subtask_index = Some(subtask_index);
        payload.sibling_subtask_ids = sibling_ids;

        let handle = self.store.create_task_handle(&run_id, payload.to_map())?;
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(run_id.clone(), handle.clone());

        if let Some(parent_handle) = self.store.task_handle(parent_run_id)? {
            parent_handle.update_with(|map| {
                map.insert(
                    "agent_status".into(),
                    json!(AgentStatus::SubtasksRunning.as_str()),
                );
                map.insert("updated_at".into(), json!(timestamp_now()));
            });
            let _ = parent_handle.force_flush();
        }

        match self.spawn_child(&run_id) {
            Ok(()) => self.add_debug_message(&format!(
                "started subtask worker {run_id} (parent {parent_run_id})"
            )),
            Err(e) => {
                tracing::error!(%run_id, error = %e, "subtask worker spawn failed");
                handle.merge({
                    let mut m = crate::task::JsonMap::new();
                    m.insert("agent_status".into(), json!(AgentStatus::Failed.as_str()));
                    m.insert("error".into(), json!(format!("worker spawn failed: {e}")));
                    m.insert("updated_at".into(), json!(timestamp_now()));
                    m
                });
                let _ = handle.force_flush();
            }
        }
        Ok(run_id)
    }

    fn spawn_child(&self, run_id: &str) -> Result<(), ManagerError> {
        let log_path = self.logs_dir.join(format!("{run_id}.log"));
        let child = ChildProcess::spawn(&self.worker_exe, run_id, &log_path)
            .map_err(ManagerError::Spawn)?;
        self.lock_children().insert(run_id.to_string(), child);
        Ok(())
    }

    /// Pid of the live child for a run, for diagnostics and tests.
    pub fn child_pid(&self, run_id: &str) -> Option<u32> {
        self.lock_children().get(run_id).map(ChildProcess::pid)
    }

    pub fn running_children(&self) -> usize {
        self.lock_children().len()
    }

    /// One monitor tick: reap exited children and reconcile their rows.
    /// Returns the reaped `(run_id, exit_code)` pairs.
    pub fn monitor_once(&self) -> Result<Vec<(String, i32)>, ManagerError> {
        let mut reaped = Vec::new();
        {
            let mut children = self.lock_children();
            let run_ids: Vec<String> = children.keys().cloned().collect();
            for run_id in run_ids {
                let exited = match children.get_mut(&run_id) {
                    Some(child) => match child.try_wait() {
                        Ok(code) => code,
                        Err(e) => {
                            tracing::error!(%run_id, error = %e, "try_wait failed");
                            None
                        }
                    },
                    None => None,
                };
                if let Some(code) = exited {
                    if let Some(mut child) = children.remove(&run_id) {
                        child.join_pumps();
                    }
                    reaped.push((run_id, code));
                }
            }
        }

        for (run_id, code) in &reaped {
            self.reconcile_exit(run_id, *code)?;
        }
        Ok(reaped)
    }

    /// Applies the exit-code policy: the exit code is advisory; the row is
    /// only rewritten when it still shows Running.
    fn reconcile_exit(&self, run_id: &str, code: i32) -> Result<(), ManagerError> {
        tracing::info!(run_id, code, "worker process exited");
        self.add_debug_message(&format!("worker for {run_id} exited with code {code}"));

        let Some(handle) = self.store.task_handle(run_id)? else {
            return Ok(());
        };
        let status = handle
            .get("agent_status")
            .and_then(|v| v.as_str().map(str::to_string));
        if status.as_deref() == Some(AgentStatus::Running.as_str()) {
            let terminal = if code == 0 {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };
            handle.merge({
                let mut m = crate::task::JsonMap::new();
                m.insert("agent_status".into(), json!(terminal.as_str()));
                if code != 0 {
                    m.insert(
                        "error".into(),
                        json!(format!("worker exited with code {code}")),
                    );
                }
                m.insert("updated_at".into(), json!(timestamp_now()));
                m
            });
            handle.force_flush()?;
            self.add_debug_message(&format!("task {run_id} reconciled to {terminal}"));
        }
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(run_id);
        Ok(())
    }

    /// Supervision loop: one tick per second until cancelled by dropping the
    /// future (e.g. via `select!` with a shutdown signal).
    pub async fn monitor_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.monitor_once() {
                tracing::error!(error = %e, "monitor tick failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    /// Terminates any live child (graceful, then force), removes the task row
    /// and deletes its logs.
    pub fn remove_task(&self, run_id: &str) -> Result<(), ManagerError> {
        if let Some(child) = self.lock_children().remove(run_id) {
            child.terminate();
            self.add_debug_message(&format!("terminated worker for {run_id}"));
        }
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(run_id);
        self.store.remove_active_task(run_id)?;
        self.store.remove_logs_for_task(run_id)?;
        self.add_debug_message(&format!("removed task {run_id}"));
        Ok(())
    }

    /// Terminates every live child with the standard escalation. Called on
    /// manager shutdown.
    pub fn shutdown(&self) {
        let children: Vec<(String, ChildProcess)> =
            self.lock_children().drain().collect();
        if children.is_empty() {
            return;
        }
        tracing::info!(count = children.len(), "terminating live workers");
        for (run_id, child) in children {
            tracing::info!(%run_id, "terminating worker");
            child.terminate();
        }
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
