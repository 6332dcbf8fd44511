//! End-to-end worker scenarios against a scripted LLM and an in-memory host:
//! engineer edit flow, planner decomposition with sub-task allocation,
//! transient-provider recovery, manager delegation, and branch auto-creation
//! idempotence.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use foreman::{
    run_worker, AgentKind, AgentStatus, ExecutorConfig, MockRepoHost, QueuedLlm,
    ScriptedResponse, TaskPayload, TaskStore, WorkerOptions,
};

struct Fixture {
    _dir: tempfile::TempDir,
    store: TaskStore,
    host: Arc<MockRepoHost>,
    state_dir: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
    let host = Arc::new(MockRepoHost::new());
    host.add_repo(
        "acme",
        "svc",
        &[("svc/routes.py", "def home():\n    return \"ok\"\n")],
    );
    host.add_repo("acme", "backend", &[("app.py", "app = make_app()\n")]);
    host.add_repo("acme", "frontend", &[("index.js", "render();\n")]);
    let state_dir = dir.path().join(".foreman");
    Fixture {
        _dir: dir,
        store,
        host,
        state_dir,
    }
}

impl Fixture {
    fn options(&self, llm: QueuedLlm) -> WorkerOptions {
        WorkerOptions {
            store: self.store.clone(),
            host: self.host.clone(),
            state_dir: self.state_dir.clone(),
            llm_override: Some(Arc::new(llm)),
            executor_config: ExecutorConfig::default(),
        }
    }

    fn insert_task(&self, mut payload: TaskPayload) -> String {
        let run_id = payload.run_id.clone();
        payload.status = AgentStatus::Queued;
        self.store
            .add_active_task(&run_id, &payload.to_map())
            .unwrap();
        run_id
    }
}

/// Engineer task with one file edit: the worker ends Completed with the
/// engineer output as `agent_output` and its `end_task` flag cleared.
#[tokio::test]
async fn engineer_task_single_edit_success() {
    let fx = fixture();
    let mut payload = TaskPayload::new(
        AgentKind::Engineer,
        "task_1001",
        "add endpoint /ping returning {\"ok\":true}",
        "acme",
        &["svc".to_string()],
        None,
        None,
    );
    payload.branch = Some("feat/ping".to_string());
    let run_id = fx.insert_task(payload);

    let llm = QueuedLlm::new(vec![
        ScriptedResponse::tool_use_with_text(
            "<analysis>adding the ping route</analysis>",
            "edit_files",
            json!({
                "modifications": [{
                    "operation": "replace",
                    "file_path": "svc/routes.py",
                    "content": "def home():\n    return \"ok\"\n\ndef ping():\n    return {\"ok\": True}\n"
                }],
                "commit_message": "add /ping endpoint"
            }),
        ),
        ScriptedResponse::tool_use(
            "generate_output",
            json!({
                "summary_of_changes": "added /ping endpoint",
                "files_modified": ["svc/routes.py"],
                "verification_status": true
            }),
        ),
    ]);

    run_worker(fx.options(llm), &run_id).await.unwrap();

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    assert_eq!(row["agent_status"], json!("Completed"));
    assert_eq!(row["agent_output"]["files_modified"], json!(["svc/routes.py"]));
    assert!(row["agent_output"].get("end_task").is_none());
    // The edit landed on the auto-created branch.
    let content = fx
        .host
        .file_content("acme", "svc", "feat/ping", "svc/routes.py")
        .unwrap();
    assert!(content.contains("def ping"));
    // The conversation was logged: system, user, 2 assistant turns, 2 tool results.
    let log = fx.store.load_log(&run_id, "agent_logger").unwrap().unwrap();
    assert_eq!(log["progress"].as_array().unwrap().len(), 6);
}

/// Planner decomposition: sub-task ids are allocated contiguously and the
/// allocator is idempotent across re-runs.
#[tokio::test]
async fn planner_decomposition_allocates_subtask_ids() {
    let fx = fixture();
    let payload = TaskPayload::new(
        AgentKind::Planner,
        "task_2001",
        "Add /ping to backend and display on about page",
        "acme",
        &["backend".to_string(), "frontend".to_string()],
        None,
        None,
    );
    let run_id = fx.insert_task(payload);

    let llm = QueuedLlm::new(vec![ScriptedResponse::tool_use(
        "generate_output",
        json!({
            "summary_of_the_problem": "needs /ping end to end",
            "list_of_subtasks": ["BE: add /ping", "FE: fetch /ping"],
            "list_of_subtask_titles": ["Add /ping", "Show /ping"],
            "list_of_subtask_repos": ["backend", "frontend"]
        }),
    )]);

    run_worker(fx.options(llm), &run_id).await.unwrap();

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    assert_eq!(row["agent_status"], json!("Completed"));
    let ids = row["subtask_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 2);

    let allocations = fx.store.get_subtask_ids(&run_id).unwrap();
    assert_eq!(allocations.len(), 2);
    for (idx, allocation) in allocations.iter().enumerate() {
        assert_eq!(allocation.subtask_index, idx);
        assert_eq!(json!(allocation.subtask_id), ids[idx]);
    }

    // Re-running the allocator yields the identical ids.
    let again = fx.store.pre_generate_subtask_ids(&run_id, 2).unwrap();
    assert_eq!(again, allocations);
}

/// Three 529s then success: exactly four LLM attempts, final Completed,
/// updated_at strictly after created_at.
#[tokio::test(start_paused = true)]
async fn transient_provider_failure_then_recovery() {
    let fx = fixture();
    let mut payload = TaskPayload::new(
        AgentKind::Engineer,
        "task_3001",
        "just generate output",
        "acme",
        &["svc".to_string()],
        None,
        None,
    );
    // Backdate creation so second-granularity timestamps can be compared strictly.
    payload.created_at = "2020-01-01 00:00:00".to_string();
    let run_id = fx.insert_task(payload);

    let llm = QueuedLlm::new(vec![
        ScriptedResponse::error(529, "Overloaded"),
        ScriptedResponse::error(529, "Overloaded"),
        ScriptedResponse::error(529, "Overloaded"),
        ScriptedResponse::tool_use(
            "generate_output",
            json!({
                "summary_of_changes": "nothing needed",
                "files_modified": [],
                "verification_status": true
            }),
        ),
    ]);

    run_worker(fx.options(llm), &run_id).await.unwrap();

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    assert_eq!(row["agent_status"], json!("Completed"));
    let created = row["created_at"].as_str().unwrap();
    let updated = row["updated_at"].as_str().unwrap();
    assert!(updated > created, "updated_at {updated} !> created_at {created}");
}

/// Retry exhaustion: a worker whose provider never recovers ends Failed with
/// an error string on the row.
#[tokio::test(start_paused = true)]
async fn provider_exhaustion_fails_task() {
    let fx = fixture();
    let payload = TaskPayload::new(
        AgentKind::Engineer,
        "task_3002",
        "doomed",
        "acme",
        &["svc".to_string()],
        None,
        None,
    );
    let run_id = fx.insert_task(payload);

    let llm = QueuedLlm::new(
        (0..20)
            .map(|_| ScriptedResponse::error(503, "busy"))
            .collect(),
    );

    let err = run_worker(fx.options(llm), &run_id).await.unwrap_err();
    assert!(err.to_string().contains("20 attempts"));

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    assert_eq!(row["agent_status"], json!("Failed"));
    assert!(row["error"].as_str().unwrap().contains("20 attempts"));
}

/// Manager delegation: the engineer sub-agent runs inline off the shared
/// scripted queue; the child row is linked and the manager completes.
#[tokio::test]
async fn manager_delegates_to_inline_engineer() {
    let fx = fixture();
    let mut payload = TaskPayload::new(
        AgentKind::Manager,
        "task_4001",
        "have the engineer add /ping, then summarize",
        "acme",
        &["svc".to_string()],
        None,
        None,
    );
    payload.branch = Some("feat/mgr".to_string());
    let run_id = fx.insert_task(payload);

    // Turn order: manager delegates; the engineer (same queue) edits and
    // finishes; the manager then produces its own output.
    let llm = QueuedLlm::new(vec![
        ScriptedResponse::tool_use(
            "delegate_task",
            json!({"task": "add a /ping endpoint to svc/routes.py"}),
        ),
        ScriptedResponse::tool_use(
            "edit_files",
            json!({
                "modifications": [{
                    "operation": "apply_diff",
                    "file_path": "svc/routes.py",
                    "diff": "@@ -1,2 +1,5 @@\n def home():\n     return \"ok\"\n+\n+def ping():\n+    return {\"ok\": True}\n"
                }]
            }),
        ),
        ScriptedResponse::tool_use(
            "generate_output",
            json!({
                "summary_of_changes": "added /ping",
                "files_modified": ["svc/routes.py"],
                "verification_status": true
            }),
        ),
        ScriptedResponse::tool_use(
            "generate_output",
            json!({
                "recommendations": ["merge the PR"],
                "issues_encountered": [],
                "pull_request_message": "Add /ping endpoint"
            }),
        ),
    ]);

    run_worker(fx.options(llm), &run_id).await.unwrap();

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    assert_eq!(row["agent_status"], json!("Completed"));
    assert_eq!(row["agent_output"]["pull_request_message"], json!("Add /ping endpoint"));

    let children = row["child_run_ids"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    let child_id = children[0].as_str().unwrap();
    let child = fx.store.get_active_task(child_id).unwrap().unwrap();
    assert_eq!(child["agent_status"], json!("Completed"));
    assert_eq!(child["parent_fullstack_id"], json!(run_id));

    let content = fx
        .host
        .file_content("acme", "svc", "feat/mgr", "svc/routes.py")
        .unwrap();
    assert!(content.contains("def ping"));
}

/// Branch auto-creation idempotence: a second engineer task against an
/// already-created branch succeeds without re-creating it.
#[tokio::test]
async fn branch_auto_creation_idempotent_across_tasks() {
    let fx = fixture();
    let script = |summary: &str| {
        QueuedLlm::new(vec![ScriptedResponse::tool_use(
            "generate_output",
            json!({
                "summary_of_changes": summary,
                "files_modified": [],
                "verification_status": true
            }),
        )])
    };

    for (i, summary) in ["first run", "second run"].iter().enumerate() {
        let mut payload = TaskPayload::new(
            AgentKind::Engineer,
            &format!("task_600{i}"),
            "touch nothing",
            "acme",
            &["svc".to_string()],
            None,
            None,
        );
        payload.branch = Some("feat/x".to_string());
        let run_id = fx.insert_task(payload);
        run_worker(fx.options(script(summary)), &run_id).await.unwrap();
        let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
        assert_eq!(row["agent_status"], json!("Completed"));
    }

    assert_eq!(
        fx.host
            .branch_names("acme", "svc")
            .iter()
            .filter(|b| b.as_str() == "feat/x")
            .count(),
        1
    );
}

/// A task created without a branch gets a kind-slug branch name before any
/// write.
#[tokio::test]
async fn missing_branch_is_auto_named() {
    let fx = fixture();
    let payload = TaskPayload::new(
        AgentKind::Engineer,
        "task_7001",
        "noop",
        "acme",
        &["svc".to_string()],
        None,
        None,
    );
    let run_id = fx.insert_task(payload);

    let llm = QueuedLlm::new(vec![ScriptedResponse::tool_use(
        "generate_output",
        json!({
            "summary_of_changes": "none",
            "files_modified": [],
            "verification_status": true
        }),
    )]);
    run_worker(fx.options(llm), &run_id).await.unwrap();

    let row = fx.store.get_active_task(&run_id).unwrap().unwrap();
    let branch = row["branch"].as_str().unwrap();
    assert!(branch.starts_with("engineer-"), "unexpected branch {branch}");
}
