//! Write-path tools: the batch file edit (the only write path to a
//! repository) and pull-request creation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::host::FileModification;
use crate::toolbox::{parse_args, Tool, ToolError, ToolSpec, Toolbox};

#[derive(Deserialize)]
struct EditFilesParams {
    modifications: Vec<FileModification>,
    #[serde(default = "default_commit_message")]
    commit_message: String,
}

fn default_commit_message() -> String {
    "apply agent edits".to_string()
}

/// Commits a batch of file modifications on the task's working branch.
/// Atomic per file: failures are reported per modification without aborting
/// the rest of the batch.
pub struct EditFilesTool {
    toolbox: Toolbox,
}

impl EditFilesTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for EditFilesTool {
    fn name(&self) -> &str {
        "edit_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_files".to_string(),
            description: "Commit a batch of file modifications to the working branch. Each \
                          modification is one of: replace (full content), apply_diff \
                          (unified diff), edit_lines (1-based inclusive range), delete."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "modifications": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "operation": {"type": "string",
                                    "enum": ["replace", "apply_diff", "edit_lines", "delete"]},
                                "file_path": {"type": "string"},
                                "content": {"type": "string"},
                                "diff": {"type": "string"},
                                "start_line": {"type": "integer"},
                                "end_line": {"type": "integer"},
                                "replacement": {"type": "string"}
                            },
                            "required": ["operation", "file_path"]
                        },
                        "minItems": 1
                    },
                    "commit_message": {"type": "string"}
                },
                "required": ["modifications"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: EditFilesParams = parse_args(self.name(), args)?;
        let branch = self.toolbox.branch().ok_or_else(|| {
            ToolError::Execution("no working branch set; cannot write".to_string())
        })?;
        let repo = self.toolbox.current_repo();
        let outcome = self
            .toolbox
            .host()
            .commit_modifications(
                self.toolbox.owner(),
                &repo,
                &branch,
                &params.commit_message,
                params.modifications,
            )
            .await?;
        tracing::info!(
            %repo,
            %branch,
            committed = outcome.committed.len(),
            failed = outcome.failed.len(),
            "edit_files commit"
        );
        let mut result = serde_json::to_value(&outcome).unwrap_or_default();
        if let Some(obj) = result.as_object_mut() {
            obj.insert("branch".to_string(), json!(branch));
            obj.insert("success".to_string(), json!(outcome.failed.is_empty()));
        }
        Ok(result)
    }
}

#[derive(Deserialize)]
struct OpenPullRequestParams {
    title: String,
    #[serde(default)]
    body: String,
}

/// Opens a pull request from the working branch.
pub struct OpenPullRequestTool {
    toolbox: Toolbox,
}

impl OpenPullRequestTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for OpenPullRequestTool {
    fn name(&self) -> &str {
        "open_pull_request"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "open_pull_request".to_string(),
            description: "Open a pull request from the working branch against the default \
                          branch."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "body": {"type": "string"}
                },
                "required": ["title"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: OpenPullRequestParams = parse_args(self.name(), args)?;
        let branch = self.toolbox.branch().ok_or_else(|| {
            ToolError::Execution("no working branch set; cannot open a pull request".to_string())
        })?;
        let repo = self.toolbox.current_repo();
        let pr = self
            .toolbox
            .host()
            .open_pull_request(
                self.toolbox.owner(),
                &repo,
                &branch,
                &params.title,
                &params.body,
            )
            .await?;
        tracing::info!(%repo, %branch, pr_url = %pr.url, "opened pull request");
        Ok(json!({"pr_url": pr.url, "pr_number": pr.number, "branch": branch}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AgentKind;
    use crate::toolbox::test_support::toolbox_fixture;

    /// **Scenario**: editing without a working branch is refused (the branch
    /// invariant for Manager/Engineer writes).
    #[tokio::test]
    async fn edit_requires_branch() {
        let (_dir, toolbox) = toolbox_fixture(AgentKind::Engineer, &["svc"]);
        let err = toolbox
            .dispatch(
                "edit_files",
                json!({"modifications": [
                    {"operation": "replace", "file_path": "a.py", "content": "x"}
                ]}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no working branch"));
    }

    /// **Scenario**: a mixed batch reports per-file success and failure and
    /// flags overall success accordingly.
    #[tokio::test]
    async fn edit_files_partial_failure() {
        let (_dir, toolbox) = crate::toolbox::test_support::toolbox_fixture_with_branch(
            AgentKind::Engineer,
            &["svc"],
            "feat/x",
        );
        toolbox.authenticate().await.unwrap();
        let out = toolbox
            .dispatch(
                "edit_files",
                json!({"modifications": [
                    {"operation": "replace", "file_path": "new.py", "content": "x = 1\n"},
                    {"operation": "delete", "file_path": "missing.py"}
                ], "commit_message": "test"}),
            )
            .await
            .unwrap();
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["committed"], json!(["new.py"]));
        assert_eq!(out["failed"][0]["file_path"], json!("missing.py"));
    }

    /// **Scenario**: open_pull_request returns the fake host's PR url.
    #[tokio::test]
    async fn open_pull_request_returns_url() {
        let (_dir, toolbox) = crate::toolbox::test_support::toolbox_fixture_with_branch(
            AgentKind::Manager,
            &["svc"],
            "feat/pr",
        );
        toolbox.authenticate().await.unwrap();
        let out = toolbox
            .dispatch("open_pull_request", json!({"title": "Add ping"}))
            .await
            .unwrap();
        assert!(out["pr_url"].as_str().unwrap().contains("/pull/"));
    }
}
