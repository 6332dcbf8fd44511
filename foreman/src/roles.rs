//! Role definitions: the system prompt assembled for each agent kind.
//!
//! Static parts (repositories, tool list, sibling agents) are baked in at
//! construction; workspace settings and repo memory stay as placeholders
//! filled on every planning turn so mid-run updates reach the model.

use crate::task::AgentKind;
use crate::toolbox::{format_other_agents, SiblingAgent, Toolbox};

const SHARED_INSTRUCTIONS: &str = r#"
You maintain chain-of-thought notes inside <analysis> tags: summarize previous
learnings, current state and next steps before choosing tools. When you learn
something durable about a repository's layout or conventions, record it inside
<repo_memory> tags; it will be shown to future runs.

Use batch_tool to combine independent tool calls into one turn. When the work
is complete, call generate_output exactly once with the final structured
result; that ends the task.

{workspace_settings}

{repo_memory}
"#;

const PLANNER_PROMPT: &str = r#"You are an expert project planner for a software development team.

Break the given task down into manageable, self-contained subtasks as quickly
as possible. You do NOT complete the task yourself. Explore only as much of
the repositories as needed to produce a confident decomposition; prefer
view_repository_structure over reading many files, and use switch_repo to
move between repositories. For a task spanning two repositories, produce one
subtask per repository. Each subtask description must stand alone so it can
be assigned to a software engineer without further context.

Repositories available to you: {available_repos}

{other_agents}

Tools available to you:
{tools}
"#;

const MANAGER_PROMPT: &str = r#"You are an engineering manager coordinating one software engineer.

Understand the task, split it into concrete implementation steps, and hand
each step to the engineer with delegate_task (a detailed description with
relevant file paths). Verify the engineer's results by reading the affected
files, then summarize the change in a pull request message and open the pull
request. Report issues honestly in your final output.

Repository: {available_repos}

{other_agents}

Tools available to you:
{tools}
"#;

const ENGINEER_PROMPT: &str = r#"You are a software engineer applying code changes through a repository host.

Read the relevant files before editing. Make the smallest change that
completes the task, commit it with edit_files on the working branch, and
verify the result by re-reading what you changed. Your final output must list
every file you modified and state whether you verified the change.

Repository: {available_repos}

{other_agents}

Tools available to you:
{tools}
"#;

/// System prompt for one role, with dynamic injection slots.
pub struct RolePrompt {
    template: String,
}

impl RolePrompt {
    pub fn for_kind(kind: AgentKind, toolbox: &Toolbox, other_agents: &[SiblingAgent]) -> Self {
        let base = match kind {
            AgentKind::Planner => PLANNER_PROMPT,
            AgentKind::Manager => MANAGER_PROMPT,
            AgentKind::Engineer => ENGINEER_PROMPT,
        };
        let tools = toolbox
            .tool_specs()
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let template = format!("{base}\n{SHARED_INSTRUCTIONS}")
            .replace("{available_repos}", &toolbox.repos().join(", "))
            .replace("{other_agents}", &format_other_agents(other_agents))
            .replace("{tools}", &tools);
        Self { template }
    }

    /// Fills the per-turn slots: workspace settings and repo memory.
    pub fn render(&self, workspace_settings: &str, repo_memory: &str) -> String {
        self.template
            .replace("{workspace_settings}", workspace_settings)
            .replace("{repo_memory}", repo_memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolbox::test_support::toolbox_fixture;

    /// **Scenario**: static slots are filled at construction, dynamic slots at
    /// render time, and re-rendering picks up new memory.
    #[test]
    fn static_and_dynamic_slots() {
        let (_dir, toolbox) = toolbox_fixture(AgentKind::Planner, &["backend", "frontend"]);
        let prompt = RolePrompt::for_kind(AgentKind::Planner, &toolbox, &[]);

        let first = prompt.render("", "no memory yet");
        assert!(first.contains("backend, frontend"));
        assert!(first.contains("- switch_repo:"));
        assert!(first.contains("no memory yet"));
        assert!(!first.contains("{available_repos}"));
        assert!(!first.contains("{repo_memory}"));

        let second = prompt.render("follow the style guide", "remembered: uses uv");
        assert!(second.contains("follow the style guide"));
        assert!(second.contains("remembered: uses uv"));
    }

    /// **Scenario**: each kind's prompt names its distinctive tool.
    #[test]
    fn role_prompts_mention_role_tools() {
        let (_d1, manager) = toolbox_fixture(AgentKind::Manager, &["svc"]);
        let text = RolePrompt::for_kind(AgentKind::Manager, &manager, &[]).render("", "");
        assert!(text.contains("delegate_task"));

        let (_d2, engineer) = toolbox_fixture(AgentKind::Engineer, &["svc"]);
        let text = RolePrompt::for_kind(AgentKind::Engineer, &engineer, &[]).render("", "");
        assert!(text.contains("edit_files"));
    }
}
