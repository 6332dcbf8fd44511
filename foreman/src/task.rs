//! Task payload model: agent kinds, lifecycle status and the JSON payload
//! stored in the `active_tasks` table.
//!
//! The store keeps payloads as raw JSON maps (the live handles mutate them
//! key by key); this module is the typed view used when a payload is read as
//! a whole. Field names match the stored wire format (`agent_type`,
//! `agent_status`, `run_id`, ...), so `from_value`/`to_value` round-trip
//! against rows written by any process.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object type used for payloads and log documents.
pub type JsonMap = Map<String, Value>;

/// Current local time in the store's timestamp format.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Seconds since the epoch, used for `task_{epoch}` style identifiers.
pub fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Kind of agent a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    /// Decomposes a task into sub-tasks across one or more repositories.
    Planner,
    /// Coordinates an engineer and opens a pull request.
    Manager,
    /// Applies code edits through the repository host.
    Engineer,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planner => "Planner",
            AgentKind::Manager => "Manager",
            AgentKind::Engineer => "Engineer",
        }
    }

    /// Lowercase slug used in generated run ids and branch names.
    pub fn slug(&self) -> &'static str {
        match self {
            AgentKind::Planner => "planner",
            AgentKind::Manager => "manager",
            AgentKind::Engineer => "engineer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Planner" => Some(AgentKind::Planner),
            "Manager" => Some(AgentKind::Manager),
            "Engineer" => Some(AgentKind::Engineer),
            _ => None,
        }
    }

    /// Validates a `generate_output` payload against this kind's output shape.
    /// Returns the normalized object with `end_task` forced on, or a
    /// human-readable description of what failed.
    pub fn validate_output(&self, value: &Value) -> Result<Value, String> {
        fn normalize<T: serde::de::DeserializeOwned + Serialize>(
            value: &Value,
        ) -> Result<Value, String> {
            let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            let mut out = serde_json::to_value(typed).map_err(|e| e.to_string())?;
            if let Some(obj) = out.as_object_mut() {
                obj.insert("end_task".to_string(), Value::Bool(true));
            }
            Ok(out)
        }
        match self {
            AgentKind::Planner => normalize::<PlannerOutput>(value),
            AgentKind::Manager => normalize::<ManagerOutput>(value),
            AgentKind::Engineer => normalize::<EngineerOutput>(value),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status. Wire strings match the stored payloads, including
/// the space-separated planner states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Queued,
    Running,
    Completed,
    Failed,
    #[serde(rename = "Subtasks Generated")]
    SubtasksGenerated,
    #[serde(rename = "Subtasks Running")]
    SubtasksRunning,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Queued => "Queued",
            AgentStatus::Running => "Running",
            AgentStatus::Completed => "Completed",
            AgentStatus::Failed => "Failed",
            AgentStatus::SubtasksGenerated => "Subtasks Generated",
            AgentStatus::SubtasksRunning => "Subtasks Running",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Planner output: the sub-task decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerOutput {
    #[serde(default, skip_serializing_if = "is_false")]
    pub end_task: bool,
    #[serde(default)]
    pub summary_of_the_problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to_the_question: Option<String>,
    #[serde(default)]
    pub most_relevant_code_file_paths: Vec<String>,
    #[serde(default)]
    pub list_of_subtasks: Vec<String>,
    #[serde(default)]
    pub list_of_subtask_titles: Vec<String>,
    #[serde(default)]
    pub list_of_subtask_repos: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub assessment_of_difficulty: String,
    #[serde(default)]
    pub assessment_of_subtask_difficulty: Vec<String>,
    #[serde(default)]
    pub assessment_of_subtask_assignment: Vec<String>,
    #[serde(default)]
    pub recommended_approach: String,
}

fn default_difficulty() -> String {
    "unknown".to_string()
}

/// Manager output: delegation results and pull-request message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerOutput {
    #[serde(default, skip_serializing_if = "is_false")]
    pub end_task: bool,
    pub recommendations: Vec<String>,
    pub issues_encountered: Vec<String>,
    pub pull_request_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// Engineer output: summary of the applied edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineerOutput {
    #[serde(default, skip_serializing_if = "is_false")]
    pub end_task: bool,
    pub summary_of_changes: String,
    pub files_modified: Vec<String>,
    pub verification_status: bool,
    #[serde(default)]
    pub error_messages: Vec<String>,
    #[serde(default)]
    pub additional_notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// Typed view over one `active_tasks` payload.
///
/// Planner tasks use `repos`/`subtask_ids`; Manager and Engineer tasks use
/// `repo`/`branch` plus the sub-task bookkeeping fields. Reading a payload
/// through this struct never mutates the stored map; writers update keys
/// individually through the task's live handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub owner: String,
    #[serde(rename = "agent_type")]
    pub kind: AgentKind,
    #[serde(rename = "agent_status")]
    pub status: AgentStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub agent_output: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub raw_logs_dump: JsonMap,

    // Planner fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtask_ids: Vec<String>,

    // Manager / Engineer fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_run_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_fullstack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sibling_subtask_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_run_ids: Vec<String>,
}

impl TaskPayload {
    /// Fresh payload in `Queued` state. Planner tasks keep the whole repo
    /// list; Manager/Engineer tasks take the first entry as their single repo.
    pub fn new(
        kind: AgentKind,
        run_id: &str,
        description: &str,
        owner: &str,
        repos: &[String],
        model_provider: Option<&str>,
        model_name: Option<&str>,
    ) -> Self {
        let now = timestamp_now();
        let mut payload = Self {
            run_id: run_id.to_string(),
            title: None,
            description: description.to_string(),
            owner: owner.to_string(),
            kind,
            status: AgentStatus::Queued,
            created_at: now.clone(),
            updated_at: now,
            model_provider: model_provider.map(str::to_string),
            model_name: model_name.map(str::to_string),
            agent_output: JsonMap::new(),
            error: None,
            raw_logs_dump: JsonMap::new(),
            repos: Vec::new(),
            subtask_ids: Vec::new(),
            repo: None,
            branch: None,
            related_run_ids: Vec::new(),
            parent_fullstack_id: None,
            subtask_index: None,
            sibling_subtask_ids: Vec::new(),
            child_run_ids: Vec::new(),
        };
        match kind {
            AgentKind::Planner => payload.repos = repos.to_vec(),
            AgentKind::Manager | AgentKind::Engineer => {
                payload.repo = repos.first().cloned();
            }
        }
        payload
    }

    /// Repositories this task touches, regardless of kind.
    pub fn repo_list(&self) -> Vec<String> {
        match self.kind {
            AgentKind::Planner => self.repos.clone(),
            _ => self.repo.iter().cloned().collect(),
        }
    }

    pub fn to_map(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }

    pub fn from_map(map: &JsonMap) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map.clone()))
    }
}
