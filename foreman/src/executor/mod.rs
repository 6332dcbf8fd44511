//! The bounded agent loop: an explicit two-phase state machine driving LLM
//! calls and tool execution until a terminal tool result appears.
//!
//! `Planning` regenerates the system prompt (fresh workspace settings and
//! repo memory), truncates the history for the LLM, calls the model with
//! retry, and records the assistant turn. `ExecutingTools` runs the turn's
//! tool calls in order and folds every result into one user message. The
//! loop ends when a recent tool result carries `end_task=true`.
//!
//! Errors inside tool calls are reported back to the model as error tool
//! results; only retry exhaustion, store failures or the step bound are
//! fatal.

pub mod state;
pub mod tags;
pub mod truncate;

pub use state::{AgentState, ToolOutputEntry};

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolChoice};
use crate::message::{ContentBlock, Message, MessageContent, Role};
use crate::roles::RolePrompt;
use crate::store::{ProgressLogger, StoreError};
use crate::task::timestamp_now;
use crate::toolbox::{ServerToolSpec, Toolbox, ToolSpec};

/// How many trailing messages the termination predicate inspects.
const TERMINATION_WINDOW: usize = 5;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("step limit reached after {0} planning rounds")]
    StepLimit(usize),
}

/// Loop tuning knobs. Defaults follow the orchestration contract: three
/// retained interaction cycles, twenty LLM attempts with capped exponential
/// backoff, and a planning-round bound as a runaway stop.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_call_stack: usize,
    pub max_attempts: u32,
    pub max_backoff_secs: u64,
    pub max_steps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_call_stack: 3,
            max_attempts: 20,
            max_backoff_secs: 300,
            max_steps: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    ExecutingTools,
    Done,
}

/// Calls the model with the loop's retry policy: up to `max_attempts`, with
/// `min(2^(i-1), max_backoff)` seconds of sleep before attempt `i`.
/// Retryability comes from [`LlmError::is_retryable`]; a non-retryable error
/// is given exactly one more attempt before aborting. Exhaustion maps to
/// [`LlmError::Exhausted`].
pub async fn invoke_with_retry(
    llm: &dyn LlmClient,
    messages: &[Message],
    tools: &[ToolSpec],
    server_tools: &[ServerToolSpec],
    tool_choice: Option<&ToolChoice>,
    max_attempts: u32,
    max_backoff_secs: u64,
) -> Result<LlmResponse, LlmError> {
    let mut last_error: Option<LlmError> = None;
    for attempt in 0..max_attempts {
        if attempt > 0 {
            let backoff = 2u64
                .saturating_pow(attempt - 1)
                .min(max_backoff_secs);
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts,
                backoff_secs = backoff,
                "retrying LLM call"
            );
            tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
        }

        match llm.invoke(messages, tools, server_tools, tool_choice).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    status = ?e.status(),
                    error = %e,
                    "LLM call failed"
                );
                if attempt + 1 == max_attempts {
                    return Err(LlmError::Exhausted {
                        attempts: max_attempts,
                        last: e.to_string(),
                    });
                }
                // Non-retryable errors get one more shot, then abort.
                if !e.is_retryable() && attempt > 0 {
                    return Err(e);
                }
                last_error = Some(e);
            }
        }
    }
    Err(LlmError::Exhausted {
        attempts: max_attempts,
        last: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// True when any tool result within the trailing window parses as a JSON
/// object with `end_task=true`.
pub fn task_complete(messages: &[Message]) -> bool {
    for message in messages.iter().rev().take(TERMINATION_WINDOW) {
        if message.role != Role::User {
            continue;
        }
        let MessageContent::Blocks(blocks) = &message.content else {
            continue;
        };
        for block in blocks {
            if let ContentBlock::ToolResult { content, .. } = block {
                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) {
                    if obj.get("end_task").and_then(Value::as_bool) == Some(true) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn tool_output_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// The per-worker agent loop.
pub struct AgentExecutor {
    llm: Arc<dyn LlmClient>,
    toolbox: Toolbox,
    logger: ProgressLogger,
    prompt: RolePrompt,
    config: ExecutorConfig,
}

impl AgentExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        toolbox: Toolbox,
        logger: ProgressLogger,
        prompt: RolePrompt,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            llm,
            toolbox,
            logger,
            prompt,
            config,
        }
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    /// Runs the loop to completion and returns the final state.
    pub async fn run(&self, user_input: &str) -> Result<AgentState, ExecutorError> {
        let mut state = AgentState::new(user_input);
        let mut phase = Phase::Planning;
        let mut planning_rounds = 0usize;

        while phase != Phase::Done {
            match phase {
                Phase::Planning => {
                    planning_rounds += 1;
                    if planning_rounds > self.config.max_steps {
                        return Err(ExecutorError::StepLimit(self.config.max_steps));
                    }
                    self.planning_step(&mut state).await?;
                    phase = Phase::ExecutingTools;
                }
                Phase::ExecutingTools => {
                    self.tool_step(&mut state).await;
                    phase = if !state.pending_tool_calls.is_empty() {
                        Phase::ExecutingTools
                    } else if task_complete(&state.messages) {
                        Phase::Done
                    } else {
                        Phase::Planning
                    };
                }
                Phase::Done => unreachable!(),
            }
        }

        self.logger.force_flush()?;
        tracing::info!(
            run_id = %self.logger.run_id(),
            rounds = planning_rounds,
            tool_calls = state.tool_outputs.len(),
            "agent loop finished"
        );
        Ok(state)
    }

    async fn planning_step(&self, state: &mut AgentState) -> Result<(), ExecutorError> {
        // Fresh settings and repo memory on every turn.
        let settings = self.toolbox.format_settings_for_injection();
        let memory = self.toolbox.format_repo_memory_for_injection();
        let system_prompt = self.prompt.render(&settings, &memory);

        let (mut full, initialized) =
            truncate::reformat_messages(&state.messages, &state.user_input, &system_prompt);
        if initialized {
            self.logger.log_message(&full[0]);
            self.logger.log_message(&full[1]);
        }
        let messages_for_llm = truncate::truncate_history(&full, self.config.max_call_stack);

        let tools = self.toolbox.tool_specs();
        let response = invoke_with_retry(
            self.llm.as_ref(),
            &messages_for_llm,
            &tools,
            self.toolbox.server_tools(),
            Some(&ToolChoice::Auto),
            self.config.max_attempts,
            self.config.max_backoff_secs,
        )
        .await?;

        let analysis = tags::extract_tag(&response.text_content, "analysis");
        if let Some(memory) = tags::extract_tag(&response.text_content, "repo_memory") {
            if let Err(e) = self.toolbox.update_repo_memory(&memory) {
                tracing::warn!(error = %e, "repo memory update failed");
            }
        }

        let assistant = Message::assistant(&response.text_content, &response.tool_calls);
        self.logger.log_message(&assistant);
        full.push(assistant);

        state.most_recent_thought = analysis
            .unwrap_or_else(|| response.text_content.trim().to_string());
        state.messages = full;
        state.pending_tool_calls = response.tool_calls;
        state.server_tool_results.extend(response.tool_results);
        Ok(())
    }

    /// Executes every pending tool call in order and appends one combined
    /// tool-result message. Tool failures become error results; nothing here
    /// is fatal to the loop.
    async fn tool_step(&self, state: &mut AgentState) {
        let calls = std::mem::take(&mut state.pending_tool_calls);
        if calls.is_empty() {
            return;
        }

        let mut blocks = Vec::with_capacity(calls.len());
        let mut entries = Vec::with_capacity(calls.len());

        for call in &calls {
            let (output, is_error) = if call.server_executed {
                match state.server_tool_results.get(&call.id) {
                    Some(result) => (
                        json!({
                            "result": result.content,
                            "status": "success",
                            "server_executed": true,
                            "instructions": format!("Tool {} executed by the provider.", call.name),
                        }),
                        false,
                    ),
                    None => (
                        Value::String(format!(
                            "Server-executed tool {} (id {}) has no recorded result",
                            call.name, call.id
                        )),
                        true,
                    ),
                }
            } else {
                match self.toolbox.dispatch(&call.name, call.input.clone()).await {
                    Ok(value) => (value, false),
                    Err(e) => (Value::String(e.to_string()), true),
                }
            };

            tracing::debug!(
                tool = %call.name,
                id = %call.id,
                is_error,
                "tool executed"
            );
            blocks.push(Message::tool_result_block(
                &call.id,
                tool_output_to_string(&output),
                is_error,
            ));
            entries.push(ToolOutputEntry {
                tool_name: call.name.clone(),
                tool_id: call.id.clone(),
                tool_input: call.input.clone(),
                tool_output: output,
                timestamp: timestamp_now(),
                is_error,
            });
        }

        let combined = Message::tool_results(blocks);
        self.logger.log_message(&combined);
        state.messages.push(combined);
        state.tool_outputs.extend(entries);
    }
}
