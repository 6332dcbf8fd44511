//! Read-only repository tools: structure view, directory listing, file read,
//! name search, substring search, and the planner's repo switch.
//!
//! All of them go through the host capability set against the toolbox's
//! current `(owner, repo, branch)` focus.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::toolbox::{parse_args, Tool, ToolError, ToolSpec, Toolbox};

const MAX_FILE_CHARS: usize = 60_000;
const MAX_SEARCH_HITS: usize = 100;

/// Renders a sorted path list as an indented tree, depth-capped.
fn render_tree(paths: &[String], max_depth: usize) -> String {
    let mut out = String::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    for path in paths {
        let segments: Vec<&str> = path.split('/').collect();
        for depth in 0..segments.len().min(max_depth) {
            let prefix = segments[..=depth].join("/");
            if seen.insert(prefix) {
                let name = segments[depth];
                let is_file = depth == segments.len() - 1;
                out.push_str(&"  ".repeat(depth));
                out.push_str(name);
                if !is_file {
                    out.push('/');
                }
                out.push('\n');
            }
        }
    }
    out
}

// --- view_repository_structure ---------------------------------------------

#[derive(Deserialize)]
struct ViewStructureParams {
    #[serde(default)]
    max_depth: Option<usize>,
}

pub struct ViewRepositoryStructureTool {
    toolbox: Toolbox,
}

impl ViewRepositoryStructureTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for ViewRepositoryStructureTool {
    fn name(&self) -> &str {
        "view_repository_structure"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "view_repository_structure".to_string(),
            description: "Show the directory tree of the current repository. Usually better \
                          than listing directories one at a time."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "max_depth": {"type": "integer", "description": "Tree depth cap (default 5)."}
                }
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: ViewStructureParams = parse_args(self.name(), args)?;
        let repo = self.toolbox.current_repo();
        let branch = self.toolbox.branch();
        let paths = self
            .toolbox
            .host()
            .list_all_paths(self.toolbox.owner(), &repo, branch.as_deref())
            .await?;
        Ok(json!({
            "repo": repo,
            "tree": render_tree(&paths, params.max_depth.unwrap_or(5)),
            "file_count": paths.len(),
        }))
    }
}

// --- list_files --------------------------------------------------------------

#[derive(Deserialize)]
struct ListFilesParams {
    #[serde(default)]
    path: String,
}

pub struct ListFilesTool {
    toolbox: Toolbox,
}

impl ListFilesTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_files".to_string(),
            description: "List one directory level of the current repository. Empty path is \
                          the repository root."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list."}
                }
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: ListFilesParams = parse_args(self.name(), args)?;
        let repo = self.toolbox.current_repo();
        let branch = self.toolbox.branch();
        let entries = self
            .toolbox
            .host()
            .list_files(self.toolbox.owner(), &repo, &params.path, branch.as_deref())
            .await?;
        Ok(serde_json::to_value(entries).unwrap_or_default())
    }
}

// --- read_file ---------------------------------------------------------------

#[derive(Deserialize)]
struct ReadFileParams {
    file_path: String,
}

pub struct ReadFileTool {
    toolbox: Toolbox,
}

impl ReadFileTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read one file from the current repository.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the repo root."}
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: ReadFileParams = parse_args(self.name(), args)?;
        let repo = self.toolbox.current_repo();
        let branch = self.toolbox.branch();
        let mut content = self
            .toolbox
            .host()
            .read_file(
                self.toolbox.owner(),
                &repo,
                &params.file_path,
                branch.as_deref(),
            )
            .await?;
        let truncated = content.len() > MAX_FILE_CHARS;
        if truncated {
            let mut end = MAX_FILE_CHARS;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
        }
        Ok(json!({
            "file_path": params.file_path,
            "content": content,
            "truncated": truncated,
        }))
    }
}

// --- search_files_by_name ----------------------------------------------------

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

pub struct SearchFilesByNameTool {
    toolbox: Toolbox,
}

impl SearchFilesByNameTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for SearchFilesByNameTool {
    fn name(&self) -> &str {
        "search_files_by_name"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_files_by_name".to_string(),
            description: "Find files in the current repository whose path contains the query."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: SearchParams = parse_args(self.name(), args)?;
        let repo = self.toolbox.current_repo();
        let branch = self.toolbox.branch();
        let mut paths = self
            .toolbox
            .host()
            .search_files_by_name(self.toolbox.owner(), &repo, &params.query, branch.as_deref())
            .await?;
        paths.truncate(MAX_SEARCH_HITS);
        Ok(json!({"matches": paths}))
    }
}

// --- search_code_substring ---------------------------------------------------

pub struct SearchCodeSubstringTool {
    toolbox: Toolbox,
}

impl SearchCodeSubstringTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for SearchCodeSubstringTool {
    fn name(&self) -> &str {
        "search_code_substring"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_code_substring".to_string(),
            description: "Search file contents of the current repository for a literal \
                          substring; returns path, line number and line for each hit."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: SearchParams = parse_args(self.name(), args)?;
        let repo = self.toolbox.current_repo();
        let branch = self.toolbox.branch();
        let mut hits = self
            .toolbox
            .host()
            .search_substring(self.toolbox.owner(), &repo, &params.query, branch.as_deref())
            .await?;
        hits.truncate(MAX_SEARCH_HITS);
        Ok(json!({"hits": hits}))
    }
}

// --- switch_repo -------------------------------------------------------------

#[derive(Deserialize)]
struct SwitchRepoParams {
    repo_name: String,
}

pub struct SwitchRepoTool {
    toolbox: Toolbox,
}

impl SwitchRepoTool {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl Tool for SwitchRepoTool {
    fn name(&self) -> &str {
        "switch_repo"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "switch_repo".to_string(),
            description: "Switch the current repository; subsequent tool calls target the \
                          new repository."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"repo_name": {"type": "string"}},
                "required": ["repo_name"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let params: SwitchRepoParams = parse_args(self.name(), args)?;
        let available = self.toolbox.repos().to_vec();
        match self.toolbox.switch_repo(&params.repo_name) {
            Ok(()) => Ok(json!({
                "success": true,
                "current_repo": self.toolbox.current_repo(),
                "available_repos": available,
            })),
            Err(message) => Ok(json!({
                "success": false,
                "current_repo": self.toolbox.current_repo(),
                "error_messages": [message],
                "available_repos": available,
            })),
        }
    }
}
