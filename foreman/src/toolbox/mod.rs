//! Role-scoped tool registry and dispatcher.
//!
//! A [`Toolbox`] owns everything a worker's tools need: the repo-host
//! capability set, the current `(owner, repo, branch)` focus, the task store,
//! workspace settings and per-repo memory. Tools are registered per agent
//! kind; dispatch validates input through each tool's typed parameters and
//! returns errors as structured strings the loop reports back to the model.
//!
//! `authenticate` obtains a host token and ensures the working branch exists:
//! a missing branch (host 404) is created from the default branch once; other
//! lookup errors are logged and tolerated.

pub mod batch;
pub mod delegate;
pub mod edit;
pub mod output;
pub mod repo;
pub mod spy;
mod tool;

pub use tool::{parse_args, ServerToolSpec, Tool, ToolSpec};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::host::{HostError, RepoHost};
use crate::store::{StoreError, TaskStore};
use crate::task::AgentKind;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("tool not found: {0}")]
    UnknownTool(String),
    #[error("batch tool cannot invoke itself")]
    NestedBatch,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("execution failed: {0}")]
    Execution(String),
}

/// Another agent working a sibling sub-task of the same parent run.
#[derive(Debug, Clone, Serialize)]
pub struct SiblingAgent {
    pub run_id: String,
    pub repo: String,
    pub description: String,
}

/// Inline sub-agent a Manager delegates to. The implementation constructs and
/// runs a full Engineer loop inside the same worker process.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Run id the sub-agent will log under (also used as its task row id).
    fn run_id(&self) -> String;

    /// Runs the sub-agent to completion and returns its final tool output.
    async fn run(&self, description: &str) -> Result<Value, ToolError>;
}

/// User-editable workspace rules injected into every system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub general_rules: Vec<String>,
    #[serde(default)]
    pub repo_specific_rules: HashMap<String, Vec<String>>,
}

struct Focus {
    repo: String,
    branch: Option<String>,
    branch_created: bool,
}

struct Inner {
    kind: AgentKind,
    run_id: String,
    owner: String,
    repos: Vec<String>,
    focus: Mutex<Focus>,
    host: Arc<dyn RepoHost>,
    store: TaskStore,
    state_dir: PathBuf,
    settings: Mutex<WorkspaceSettings>,
    repo_memory: Mutex<HashMap<String, String>>,
    other_agents: Vec<SiblingAgent>,
    sub_agent: Mutex<Option<Arc<dyn SubAgent>>>,
    server_tools: Vec<ServerToolSpec>,
    token: Mutex<Option<String>>,
}

/// Cheap-to-clone handle shared by the executor and every registered tool.
#[derive(Clone)]
pub struct Toolbox {
    inner: Arc<Inner>,
}

/// Construction parameters for [`Toolbox::new`].
pub struct ToolboxConfig {
    pub kind: AgentKind,
    pub run_id: String,
    pub owner: String,
    pub repos: Vec<String>,
    pub branch: Option<String>,
    pub host: Arc<dyn RepoHost>,
    pub store: TaskStore,
    /// Directory for settings.json and per-repo memory files.
    pub state_dir: PathBuf,
    pub other_agents: Vec<SiblingAgent>,
    pub server_tools: Vec<ServerToolSpec>,
}

impl Toolbox {
    pub fn new(config: ToolboxConfig) -> Result<Self, ToolError> {
        let current_repo = config
            .repos
            .first()
            .cloned()
            .ok_or_else(|| ToolError::Execution("toolbox requires at least one repo".into()))?;

        let settings = load_settings(&config.state_dir, &config.repos)?;
        let repo_memory = load_repo_memory(&config.state_dir, &config.repos)?;

        Ok(Self {
            inner: Arc::new(Inner {
                kind: config.kind,
                run_id: config.run_id,
                owner: config.owner,
                repos: config.repos,
                focus: Mutex::new(Focus {
                    repo: current_repo,
                    branch: config.branch,
                    branch_created: false,
                }),
                host: config.host,
                store: config.store,
                state_dir: config.state_dir,
                settings: Mutex::new(settings),
                repo_memory: Mutex::new(repo_memory),
                other_agents: config.other_agents,
                sub_agent: Mutex::new(None),
                server_tools: config.server_tools,
                token: Mutex::new(None),
            }),
        })
    }

    // --- accessors --------------------------------------------------------

    pub fn kind(&self) -> AgentKind {
        self.inner.kind
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn repos(&self) -> &[String] {
        &self.inner.repos
    }

    pub fn current_repo(&self) -> String {
        self.lock_focus().repo.clone()
    }

    pub fn branch(&self) -> Option<String> {
        self.lock_focus().branch.clone()
    }

    pub fn host(&self) -> Arc<dyn RepoHost> {
        Arc::clone(&self.inner.host)
    }

    pub fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    /// Host token from the last `authenticate()`, if any.
    pub fn token(&self) -> Option<String> {
        self.inner
            .token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn other_agents(&self) -> &[SiblingAgent] {
        &self.inner.other_agents
    }

    pub fn server_tools(&self) -> &[ServerToolSpec] {
        &self.inner.server_tools
    }

    /// Installs the Manager's inline Engineer (done after construction since
    /// the sub-agent needs its own toolbox).
    pub fn set_sub_agent(&self, sub_agent: Arc<dyn SubAgent>) {
        *self
            .inner
            .sub_agent
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(sub_agent);
    }

    pub fn sub_agent(&self) -> Option<Arc<dyn SubAgent>> {
        self.inner
            .sub_agent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_focus(&self) -> std::sync::MutexGuard<'_, Focus> {
        self.inner.focus.lock().unwrap_or_else(|p| p.into_inner())
    }

    // --- authentication ---------------------------------------------------

    /// Obtains a host token and ensures the working branch exists. A missing
    /// branch is created from the default branch exactly once; other lookup
    /// errors are logged and tolerated so a transient host hiccup does not
    /// kill the task before the first LLM call.
    pub async fn authenticate(&self) -> Result<(), ToolError> {
        let token = self.inner.host.authenticate().await?;
        *self.inner.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(token);

        let (repo, branch, created) = {
            let focus = self.lock_focus();
            (focus.repo.clone(), focus.branch.clone(), focus.branch_created)
        };
        let Some(branch) = branch else {
            return Ok(());
        };
        if created {
            return Ok(());
        }

        match self
            .inner
            .host
            .lookup_branch(&self.inner.owner, &repo, &branch)
            .await
        {
            Ok(()) => {
                tracing::debug!(%branch, "branch already exists");
            }
            Err(HostError::NotFound(_)) => {
                match self
                    .inner
                    .host
                    .create_branch_from_default(&self.inner.owner, &repo, &branch)
                    .await
                {
                    Ok(()) => {
                        self.lock_focus().branch_created = true;
                        tracing::info!(%branch, %repo, "created branch from default");
                    }
                    Err(e) => {
                        tracing::warn!(%branch, error = %e, "branch creation failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%branch, error = %e, "branch lookup failed; continuing");
            }
        }
        Ok(())
    }

    // --- dispatch ---------------------------------------------------------

    /// The role's ordered tool list, batch tool included.
    pub fn get_all_tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(batch::BatchTool::new(self.clone())),
            Arc::new(repo::ViewRepositoryStructureTool::new(self.clone())),
            Arc::new(repo::ListFilesTool::new(self.clone())),
            Arc::new(repo::ReadFileTool::new(self.clone())),
            Arc::new(repo::SearchFilesByNameTool::new(self.clone())),
            Arc::new(repo::SearchCodeSubstringTool::new(self.clone())),
            Arc::new(spy::SpyOnAgentTool::new(self.clone())),
        ];
        match self.inner.kind {
            AgentKind::Planner => {
                tools.push(Arc::new(repo::SwitchRepoTool::new(self.clone())));
            }
            AgentKind::Engineer => {
                tools.push(Arc::new(edit::EditFilesTool::new(self.clone())));
            }
            AgentKind::Manager => {
                tools.push(Arc::new(edit::EditFilesTool::new(self.clone())));
                tools.push(Arc::new(delegate::DelegateTaskTool::new(self.clone())));
                tools.push(Arc::new(edit::OpenPullRequestTool::new(self.clone())));
            }
        }
        tools.push(Arc::new(output::GenerateOutputTool::new(self.inner.kind)));
        tools
    }

    /// Tool descriptors in registration order.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.get_all_tools().iter().map(|t| t.spec()).collect()
    }

    /// Looks up a tool by name and invokes it.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .get_all_tools()
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(args).await
    }

    // --- settings & repo memory -------------------------------------------

    /// Formats workspace rules for system-prompt injection. Empty when no
    /// rules apply to the current repo.
    pub fn format_settings_for_injection(&self) -> String {
        let repo = self.current_repo();
        let settings = self
            .inner
            .settings
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let general = &settings.general_rules;
        let repo_rules = settings
            .repo_specific_rules
            .get(&repo)
            .cloned()
            .unwrap_or_default();

        let mut out = String::new();
        if !general.is_empty() {
            out.push_str(&format!(
                "These are additional rules from the user of this system which must be followed: {general:?}\n"
            ));
        }
        if !repo_rules.is_empty() {
            out.push_str(&format!(
                "These rules must be followed for this specific repository ({repo}): {repo_rules:?}\n"
            ));
        }
        out
    }

    /// Formats per-repo memory for system-prompt injection.
    pub fn format_repo_memory_for_injection(&self) -> String {
        let repo = self.current_repo();
        let memory = self
            .inner
            .repo_memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&repo)
            .cloned()
            .unwrap_or_default();
        if memory.trim().is_empty() {
            "You have no saved memory about this repository yet. When you learn something \
             durable about its layout or conventions, record it inside <repo_memory> tags."
                .to_string()
        } else {
            format!(
                "Saved memory about repository {repo} from previous runs:\n{memory}\n\
                 Update it by emitting new <repo_memory> tags when it is stale."
            )
        }
    }

    /// Persists new memory for the current repo (invoked when the model emits
    /// a `<repo_memory>` region).
    pub fn update_repo_memory(&self, content: &str) -> Result<(), ToolError> {
        let repo = self.current_repo();
        let path = memory_file(&self.inner.state_dir, &repo);
        let doc = serde_json::json!({"memory": content});
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap_or_default())
            .map_err(|e| ToolError::Execution(format!("write repo memory: {e}")))?;
        self.inner
            .repo_memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(repo.clone(), content.to_string());
        tracing::debug!(%repo, "updated repo memory");
        Ok(())
    }

    /// Moves the repo focus; subsequent host operations target the new repo.
    pub fn switch_repo(&self, repo_name: &str) -> Result<(), String> {
        if !self.inner.repos.iter().any(|r| r == repo_name) {
            return Err(format!("repository not available: {repo_name}"));
        }
        self.lock_focus().repo = repo_name.to_string();
        Ok(())
    }
}

fn memory_file(state_dir: &Path, repo: &str) -> PathBuf {
    state_dir.join("memory").join(format!("{repo}.json"))
}

fn load_settings(state_dir: &Path, repos: &[String]) -> Result<WorkspaceSettings, ToolError> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| ToolError::Execution(format!("create state dir: {e}")))?;
    let path = state_dir.join("settings.json");

    let mut settings = if path.is_file() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ToolError::Execution(format!("read settings: {e}")))?;
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "settings.json unreadable; using defaults");
            WorkspaceSettings::default()
        })
    } else {
        WorkspaceSettings::default()
    };

    let mut dirty = !path.is_file();
    for repo in repos {
        if !settings.repo_specific_rules.contains_key(repo) {
            settings
                .repo_specific_rules
                .insert(repo.clone(), Vec::new());
            dirty = true;
        }
    }
    if dirty {
        let raw = serde_json::to_string_pretty(&settings).unwrap_or_default();
        std::fs::write(&path, raw)
            .map_err(|e| ToolError::Execution(format!("write settings: {e}")))?;
    }
    Ok(settings)
}

fn load_repo_memory(
    state_dir: &Path,
    repos: &[String],
) -> Result<HashMap<String, String>, ToolError> {
    let memory_dir = state_dir.join("memory");
    std::fs::create_dir_all(&memory_dir)
        .map_err(|e| ToolError::Execution(format!("create memory dir: {e}")))?;

    let mut out = HashMap::new();
    for repo in repos {
        let path = memory_file(state_dir, repo);
        if !path.is_file() {
            let blank = serde_json::json!({"memory": ""});
            std::fs::write(&path, serde_json::to_string_pretty(&blank).unwrap_or_default())
                .map_err(|e| ToolError::Execution(format!("init repo memory: {e}")))?;
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ToolError::Execution(format!("read repo memory: {e}")))?;
        let memory = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| v.get("memory").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        out.insert(repo.clone(), memory);
    }
    Ok(out)
}

/// Formats sibling-agent info for the system prompt.
pub fn format_other_agents(other_agents: &[SiblingAgent]) -> String {
    if other_agents.is_empty() {
        return "No other agents are currently working on related tasks.".to_string();
    }
    let mut out = String::from("Other agents currently working on related tasks:\n\n");
    for (i, agent) in other_agents.iter().enumerate() {
        out.push_str(&format!(
            "{}. Agent {}\n   Repository: {}\n   Subtask: {}\n\n",
            i + 1,
            agent.run_id,
            agent.repo,
            agent.description
        ));
    }
    out.push_str("Coordinate with these agents to avoid duplicate work.");
    out
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::host::MockRepoHost;

    /// Toolbox over a seeded mock host and temp store/state dir.
    pub fn toolbox_fixture(kind: AgentKind, repos: &[&str]) -> (tempfile::TempDir, Toolbox) {
        build_fixture(kind, repos, None)
    }

    /// Same fixture with a working branch set.
    pub fn toolbox_fixture_with_branch(
        kind: AgentKind,
        repos: &[&str],
        branch: &str,
    ) -> (tempfile::TempDir, Toolbox) {
        build_fixture(kind, repos, Some(branch))
    }

    fn build_fixture(
        kind: AgentKind,
        repos: &[&str],
        branch: Option<&str>,
    ) -> (tempfile::TempDir, Toolbox) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
        let host = MockRepoHost::new();
        for repo in repos {
            host.add_repo(
                "acme",
                repo,
                &[
                    ("routes.py", "def home():\n    return \"ok\"\n"),
                    ("lib/util.py", "VALUE = 1\n"),
                ],
            );
        }
        let toolbox = Toolbox::new(ToolboxConfig {
            kind,
            run_id: "run_test".into(),
            owner: "acme".into(),
            repos: repos.iter().map(|r| r.to_string()).collect(),
            branch: branch.map(str::to_string),
            host: Arc::new(host),
            store,
            state_dir: dir.path().join(".foreman"),
            other_agents: Vec::new(),
            server_tools: Vec::new(),
        })
        .unwrap();
        (dir, toolbox)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::toolbox_fixture;
    use super::*;
    use crate::host::MockRepoHost;

    /// **Scenario**: role toolsets differ — only the Manager gets delegation and
    /// PR tools, only the Planner gets switch_repo, and every role ends with
    /// generate_output.
    #[test]
    fn role_toolsets() {
        let (_d, planner) = toolbox_fixture(AgentKind::Planner, &["backend", "frontend"]);
        let (_d2, manager) = toolbox_fixture(AgentKind::Manager, &["svc"]);
        let (_d3, engineer) = toolbox_fixture(AgentKind::Engineer, &["svc"]);

        let names = |tb: &Toolbox| -> Vec<String> {
            tb.get_all_tools().iter().map(|t| t.name().to_string()).collect()
        };
        let planner_names = names(&planner);
        let manager_names = names(&manager);
        let engineer_names = names(&engineer);

        assert!(planner_names.contains(&"switch_repo".to_string()));
        assert!(!planner_names.contains(&"edit_files".to_string()));
        assert!(manager_names.contains(&"delegate_task".to_string()));
        assert!(manager_names.contains(&"open_pull_request".to_string()));
        assert!(engineer_names.contains(&"edit_files".to_string()));
        assert!(!engineer_names.contains(&"delegate_task".to_string()));
        for names in [&planner_names, &manager_names, &engineer_names] {
            assert_eq!(names.last().map(String::as_str), Some("generate_output"));
            assert_eq!(names.first().map(String::as_str), Some("batch_tool"));
        }
    }

    /// **Scenario**: authenticate creates a missing branch once; a second
    /// authenticate (or a second toolbox against the same branch) is a no-op.
    #[tokio::test]
    async fn authenticate_creates_branch_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
        let host = Arc::new(MockRepoHost::new());
        host.add_repo("acme", "svc", &[("a.py", "x = 1\n")]);

        let make = |run: &str| {
            Toolbox::new(ToolboxConfig {
                kind: AgentKind::Engineer,
                run_id: run.into(),
                owner: "acme".into(),
                repos: vec!["svc".into()],
                branch: Some("feat/x".into()),
                host: host.clone(),
                store: store.clone(),
                state_dir: dir.path().join(".foreman"),
                other_agents: Vec::new(),
                server_tools: Vec::new(),
            })
            .unwrap()
        };

        let first = make("run_1");
        first.authenticate().await.unwrap();
        assert!(host.branch_names("acme", "svc").contains(&"feat/x".to_string()));

        // Second task against the same existing branch succeeds without recreating.
        let second = make("run_2");
        second.authenticate().await.unwrap();
        assert_eq!(
            host.branch_names("acme", "svc")
                .iter()
                .filter(|b| b.as_str() == "feat/x")
                .count(),
            1
        );
    }

    /// **Scenario**: repo memory persists to disk and survives a fresh toolbox.
    #[test]
    fn repo_memory_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
        let host = Arc::new(MockRepoHost::new());
        host.add_repo("acme", "svc", &[]);
        let config = |run: &str| ToolboxConfig {
            kind: AgentKind::Engineer,
            run_id: run.into(),
            owner: "acme".into(),
            repos: vec!["svc".into()],
            branch: None,
            host: host.clone(),
            store: store.clone(),
            state_dir: dir.path().join(".foreman"),
            other_agents: Vec::new(),
            server_tools: Vec::new(),
        };

        let toolbox = Toolbox::new(config("run_1")).unwrap();
        assert!(toolbox
            .format_repo_memory_for_injection()
            .contains("no saved memory"));
        toolbox.update_repo_memory("uses FastAPI routers").unwrap();

        let fresh = Toolbox::new(config("run_2")).unwrap();
        assert!(fresh
            .format_repo_memory_for_injection()
            .contains("uses FastAPI routers"));
    }

    /// **Scenario**: switch_repo rejects unknown repos and moves focus otherwise.
    #[test]
    fn switch_repo_focus() {
        let (_d, toolbox) = toolbox_fixture(AgentKind::Planner, &["backend", "frontend"]);
        assert_eq!(toolbox.current_repo(), "backend");
        toolbox.switch_repo("frontend").unwrap();
        assert_eq!(toolbox.current_repo(), "frontend");
        assert!(toolbox.switch_repo("other").is_err());
    }

    /// **Scenario**: sibling-agent formatting covers both the empty and populated cases.
    #[test]
    fn other_agents_formatting() {
        assert!(format_other_agents(&[]).contains("No other agents"));
        let text = format_other_agents(&[SiblingAgent {
            run_id: "pm_subtask_1_0".into(),
            repo: "frontend".into(),
            description: "FE: fetch /ping".into(),
        }]);
        assert!(text.contains("pm_subtask_1_0"));
        assert!(text.contains("frontend"));
    }
}
