//! Repository-host capability set.
//!
//! The kernel never talks to a code host directly; it consumes this trait.
//! The batch commit is the only write path and is atomic at file granularity,
//! not across files. [`MockRepoHost`] is the in-memory implementation used by
//! tests and local runs; a production client is injected by the embedding
//! application.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("host api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("edit failed: {0}")]
    EditRejected(String),
    #[error("host error: {0}")]
    Other(String),
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One substring-search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// One file-level edit inside a batch commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FileModification {
    /// Replace the whole file (creating it if absent).
    Replace { file_path: String, content: String },
    /// Apply a unified diff, with whitespace-tolerant hunk recovery.
    ApplyDiff { file_path: String, diff: String },
    /// Replace an inclusive 1-based line range.
    EditLines {
        file_path: String,
        start_line: usize,
        end_line: usize,
        replacement: String,
    },
    /// Delete the file.
    Delete { file_path: String },
}

impl FileModification {
    pub fn file_path(&self) -> &str {
        match self {
            FileModification::Replace { file_path, .. }
            | FileModification::ApplyDiff { file_path, .. }
            | FileModification::EditLines { file_path, .. }
            | FileModification::Delete { file_path } => file_path,
        }
    }
}

/// Result of a batch commit: per-file success or failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitOutcome {
    pub committed: Vec<String>,
    pub failed: Vec<FailedModification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedModification {
    pub file_path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

/// Async capability set for one code host.
#[async_trait]
pub trait RepoHost: Send + Sync + std::fmt::Debug {
    /// Obtains (or refreshes) an access token.
    async fn authenticate(&self) -> Result<String, HostError>;

    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String, HostError>;

    /// Errs with [`HostError::NotFound`] when the branch does not exist;
    /// callers treat that as the signal to create it.
    async fn lookup_branch(&self, owner: &str, repo: &str, branch: &str)
        -> Result<(), HostError>;

    /// Creates `branch` from the repository's default branch. Creating an
    /// existing branch is a tolerated no-op.
    async fn create_branch_from_default(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), HostError>;

    /// Lists one directory level (empty `path` is the repository root).
    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<Vec<FileEntry>, HostError>;

    /// Every file path in the repository, sorted.
    async fn list_all_paths(
        &self,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
    ) -> Result<Vec<String>, HostError>;

    async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<String, HostError>;

    async fn search_files_by_name(
        &self,
        owner: &str,
        repo: &str,
        query: &str,
        branch: Option<&str>,
    ) -> Result<Vec<String>, HostError>;

    async fn search_substring(
        &self,
        owner: &str,
        repo: &str,
        query: &str,
        branch: Option<&str>,
    ) -> Result<Vec<SearchHit>, HostError>;

    /// Applies a batch of modifications as one commit. Atomic per file: a
    /// failing edit is reported in the outcome without aborting the rest.
    async fn commit_modifications(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        message: &str,
        modifications: Vec<FileModification>,
    ) -> Result<CommitOutcome, HostError>;

    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError>;
}

// --- unified diff application ----------------------------------------------

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<(char, String)>,
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            // "@@ -a,b +c,d @@" — only the old start position matters here.
            let old_start = rest
                .split_whitespace()
                .find(|tok| tok.starts_with('-'))
                .and_then(|tok| tok[1..].split(',').next())
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| format!("malformed hunk header: {line}"))?;
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(h) = current.as_mut() {
            match line.chars().next() {
                Some(c @ (' ' | '-' | '+')) => h.lines.push((c, line[1..].to_string())),
                Some('\\') => {} // "\ No newline at end of file"
                None => h.lines.push((' ', String::new())),
                Some(_) => return Err(format!("unexpected diff line: {line}")),
            }
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        return Err("diff contains no hunks".to_string());
    }
    Ok(hunks)
}

fn hunk_matches(file: &[String], pos: usize, old_lines: &[&String], exact: bool) -> bool {
    if pos + old_lines.len() > file.len() {
        return false;
    }
    old_lines.iter().enumerate().all(|(i, expected)| {
        let actual = &file[pos + i];
        if exact {
            actual == *expected
        } else {
            actual.trim() == expected.trim()
        }
    })
}

/// Applies a unified diff. Hunks are anchored at their stated position first;
/// when the context does not match there, the old text is searched exactly and
/// then whitespace-insensitively across the file before the hunk is rejected.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, String> {
    let hunks = parse_hunks(diff)?;
    let mut file: Vec<String> = original.lines().map(str::to_string).collect();

    for hunk in &hunks {
        let old_lines: Vec<&String> = hunk
            .lines
            .iter()
            .filter(|(c, _)| *c == ' ' || *c == '-')
            .map(|(_, l)| l)
            .collect();
        let new_lines: Vec<String> = hunk
            .lines
            .iter()
            .filter(|(c, _)| *c == ' ' || *c == '+')
            .map(|(_, l)| l.clone())
            .collect();

        let stated = hunk.old_start.saturating_sub(1);
        let pos = if hunk_matches(&file, stated, &old_lines, true) {
            stated
        } else {
            let exact = (0..=file.len().saturating_sub(old_lines.len()))
                .find(|&p| hunk_matches(&file, p, &old_lines, true));
            match exact {
                Some(p) => p,
                None => (0..=file.len().saturating_sub(old_lines.len()))
                    .find(|&p| hunk_matches(&file, p, &old_lines, false))
                    .ok_or_else(|| {
                        format!("hunk at line {} does not match file content", hunk.old_start)
                    })?,
            }
        };

        file.splice(pos..pos + old_lines.len(), new_lines);
    }

    let mut out = file.join("\n");
    if original.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

// --- mock host --------------------------------------------------------------

#[derive(Default, Debug)]
struct MockRepoState {
    default_branch: String,
    /// branch name -> (path -> content)
    branches: HashMap<String, BTreeMap<String, String>>,
}

/// In-memory host: branches are copies of the default branch's file map.
/// Pull requests get sequential numbers under a fake URL scheme.
#[derive(Debug)]
pub struct MockRepoHost {
    repos: Mutex<HashMap<String, MockRepoState>>,
    next_pr: Mutex<u64>,
}

impl Default for MockRepoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRepoHost {
    pub fn new() -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            next_pr: Mutex::new(1),
        }
    }

    fn key(owner: &str, repo: &str) -> String {
        format!("{owner}/{repo}")
    }

    /// Seeds a repository with files on its default branch (`main`).
    pub fn add_repo(&self, owner: &str, repo: &str, files: &[(&str, &str)]) {
        let mut repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        let mut tree = BTreeMap::new();
        for (path, content) in files {
            tree.insert(path.to_string(), content.to_string());
        }
        let mut state = MockRepoState {
            default_branch: "main".to_string(),
            branches: HashMap::new(),
        };
        state.branches.insert("main".to_string(), tree);
        repos.insert(Self::key(owner, repo), state);
    }

    /// Seeds repositories from a directory: each top-level subdirectory
    /// becomes a repository owned by `owner`, its files recursively copied
    /// onto the default branch. Used by worker processes in test runs.
    pub fn from_dir(owner: &str, dir: &std::path::Path) -> std::io::Result<Self> {
        fn walk(
            base: &std::path::Path,
            dir: &std::path::Path,
            out: &mut Vec<(String, String)>,
        ) -> std::io::Result<()> {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    walk(base, &path, out)?;
                } else {
                    let rel = path
                        .strip_prefix(base)
                        .map_err(|e| std::io::Error::other(e.to_string()))?
                        .to_string_lossy()
                        .replace('\\', "/");
                    out.push((rel, std::fs::read_to_string(&path)?));
                }
            }
            Ok(())
        }

        let host = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let repo = entry.file_name().to_string_lossy().to_string();
            let mut files = Vec::new();
            walk(&path, &path, &mut files)?;
            let refs: Vec<(&str, &str)> = files
                .iter()
                .map(|(p, c)| (p.as_str(), c.as_str()))
                .collect();
            host.add_repo(owner, &repo, &refs);
        }
        Ok(host)
    }

    /// Direct read of a file for test assertions.
    pub fn file_content(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Option<String> {
        let repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        repos
            .get(&Self::key(owner, repo))
            .and_then(|s| s.branches.get(branch))
            .and_then(|tree| tree.get(path).cloned())
    }

    pub fn branch_names(&self, owner: &str, repo: &str) -> Vec<String> {
        let repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        repos
            .get(&Self::key(owner, repo))
            .map(|s| {
                let mut names: Vec<String> = s.branches.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    fn with_tree<T>(
        &self,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
        f: impl FnOnce(&BTreeMap<String, String>) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        let repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        let state = repos
            .get(&Self::key(owner, repo))
            .ok_or_else(|| HostError::NotFound(format!("repository {owner}/{repo}")))?;
        let branch = branch.unwrap_or(&state.default_branch);
        let tree = state
            .branches
            .get(branch)
            .ok_or_else(|| HostError::NotFound(format!("branch {branch}")))?;
        f(tree)
    }
}

#[async_trait]
impl RepoHost for MockRepoHost {
    async fn authenticate(&self) -> Result<String, HostError> {
        Ok("mock-token".to_string())
    }

    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String, HostError> {
        let repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        repos
            .get(&Self::key(owner, repo))
            .map(|s| s.default_branch.clone())
            .ok_or_else(|| HostError::NotFound(format!("repository {owner}/{repo}")))
    }

    async fn lookup_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), HostError> {
        self.with_tree(owner, repo, Some(branch), |_| Ok(()))
    }

    async fn create_branch_from_default(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), HostError> {
        let mut repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        let state = repos
            .get_mut(&Self::key(owner, repo))
            .ok_or_else(|| HostError::NotFound(format!("repository {owner}/{repo}")))?;
        if state.branches.contains_key(branch) {
            return Ok(()); // tolerated no-op
        }
        let base = state
            .branches
            .get(&state.default_branch)
            .cloned()
            .unwrap_or_default();
        state.branches.insert(branch.to_string(), base);
        Ok(())
    }

    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<Vec<FileEntry>, HostError> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        self.with_tree(owner, repo, branch, |tree| {
            let mut entries: Vec<FileEntry> = Vec::new();
            let mut seen_dirs = std::collections::HashSet::new();
            for file_path in tree.keys() {
                let Some(rest) = file_path.strip_prefix(&prefix) else {
                    continue;
                };
                match rest.split_once('/') {
                    None => entries.push(FileEntry {
                        path: file_path.clone(),
                        kind: EntryKind::File,
                    }),
                    Some((dir, _)) => {
                        if seen_dirs.insert(dir.to_string()) {
                            entries.push(FileEntry {
                                path: format!("{prefix}{dir}"),
                                kind: EntryKind::Dir,
                            });
                        }
                    }
                }
            }
            Ok(entries)
        })
    }

    async fn list_all_paths(
        &self,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
    ) -> Result<Vec<String>, HostError> {
        self.with_tree(owner, repo, branch, |tree| {
            Ok(tree.keys().cloned().collect())
        })
    }

    async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<String, HostError> {
        self.with_tree(owner, repo, branch, |tree| {
            tree.get(path)
                .cloned()
                .ok_or_else(|| HostError::NotFound(format!("file {path}")))
        })
    }

    async fn search_files_by_name(
        &self,
        owner: &str,
        repo: &str,
        query: &str,
        branch: Option<&str>,
    ) -> Result<Vec<String>, HostError> {
        let needle = query.to_lowercase();
        self.with_tree(owner, repo, branch, |tree| {
            Ok(tree
                .keys()
                .filter(|p| p.to_lowercase().contains(&needle))
                .cloned()
                .collect())
        })
    }

    async fn search_substring(
        &self,
        owner: &str,
        repo: &str,
        query: &str,
        branch: Option<&str>,
    ) -> Result<Vec<SearchHit>, HostError> {
        self.with_tree(owner, repo, branch, |tree| {
            let mut hits = Vec::new();
            for (path, content) in tree {
                for (idx, line) in content.lines().enumerate() {
                    if line.contains(query) {
                        hits.push(SearchHit {
                            path: path.clone(),
                            line_number: idx + 1,
                            line: line.to_string(),
                        });
                    }
                }
            }
            Ok(hits)
        })
    }

    async fn commit_modifications(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        _message: &str,
        modifications: Vec<FileModification>,
    ) -> Result<CommitOutcome, HostError> {
        let mut repos = self.repos.lock().unwrap_or_else(|p| p.into_inner());
        let state = repos
            .get_mut(&Self::key(owner, repo))
            .ok_or_else(|| HostError::NotFound(format!("repository {owner}/{repo}")))?;
        let tree = state
            .branches
            .get_mut(branch)
            .ok_or_else(|| HostError::NotFound(format!("branch {branch}")))?;

        let mut outcome = CommitOutcome::default();
        for modification in modifications {
            let path = modification.file_path().to_string();
            let result: Result<(), String> = match modification {
                FileModification::Replace { content, .. } => {
                    tree.insert(path.clone(), content);
                    Ok(())
                }
                FileModification::ApplyDiff { diff, .. } => match tree.get(&path) {
                    Some(original) => apply_unified_diff(original, &diff).map(|updated| {
                        tree.insert(path.clone(), updated);
                    }),
                    None => Err(format!("file {path} not found")),
                },
                FileModification::EditLines {
                    start_line,
                    end_line,
                    replacement,
                    ..
                } => match tree.get(&path) {
                    Some(original) => {
                        let mut lines: Vec<&str> = original.lines().collect();
                        if start_line == 0 || end_line < start_line || end_line > lines.len() {
                            Err(format!(
                                "line range {start_line}..{end_line} out of bounds for {path}"
                            ))
                        } else {
                            let replacement_lines: Vec<&str> = replacement.lines().collect();
                            lines.splice(start_line - 1..end_line, replacement_lines);
                            tree.insert(path.clone(), lines.join("\n"));
                            Ok(())
                        }
                    }
                    None => Err(format!("file {path} not found")),
                },
                FileModification::Delete { .. } => {
                    if tree.remove(&path).is_some() {
                        Ok(())
                    } else {
                        Err(format!("file {path} not found"))
                    }
                }
            };
            match result {
                Ok(()) => outcome.committed.push(path),
                Err(error) => outcome.failed.push(FailedModification {
                    file_path: path,
                    error,
                }),
            }
        }
        Ok(outcome)
    }

    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<PullRequest, HostError> {
        self.lookup_branch(owner, repo, head_branch).await?;
        let mut next = self.next_pr.lock().unwrap_or_else(|p| p.into_inner());
        let number = *next;
        *next += 1;
        Ok(PullRequest {
            url: format!("https://mockhost.invalid/{owner}/{repo}/pull/{number}"),
            number,
        })
    }
}
