//! # Foreman
//!
//! A task-orchestration kernel for long-running LLM-agent executions. A task
//! names an agent kind (Planner, Manager or Engineer), a description and the
//! repositories it works against; the manager persists it, spawns one worker
//! process per task and supervises the lifecycle, while every worker drives a
//! bounded planning/tool-execution loop against an LLM and reports progress
//! through a shared SQLite store.
//!
//! ## Design principles
//!
//! - **The store is the registry**: worker and manager agree on task identity
//!   only through the database; the manager's `run_id → process` map is
//!   purely supervisory.
//! - **Debounced live handles**: rapid payload mutations coalesce into one
//!   write after a quiet period ([`LiveHandle`]); after quiescence the row
//!   equals the in-memory state.
//! - **Explicit loop, no graph framework**: the agent loop is a two-phase
//!   state machine with a termination predicate ([`AgentExecutor`]).
//! - **Provider-agnostic executor**: one [`LlmResponse`] shape, one adapter
//!   per provider; the loop never branches on the provider.
//! - **Errors flow to the model**: tool failures become error tool results so
//!   the loop can adapt; only retry exhaustion and store failures are fatal.
//!
//! ## Main modules
//!
//! - [`store`]: [`TaskStore`], [`LiveHandle`], [`ProgressLogger`] — WAL
//!   SQLite persistence, debounced row views, append-only progress logs,
//!   debug ring and sub-task id allocation.
//! - [`task`]: [`TaskPayload`], [`AgentKind`], [`AgentStatus`], per-kind
//!   outputs.
//! - [`message`]: [`Message`] and typed content blocks.
//! - [`llm`]: [`LlmClient`], [`AnthropicClient`], [`OpenAiClient`],
//!   [`QueuedLlm`], the retry table and the model registry.
//! - [`toolbox`]: [`Toolbox`], the [`Tool`] trait, role toolsets, batch tool,
//!   delegation and workspace settings/repo memory.
//! - [`host`]: the [`RepoHost`] capability set and [`MockRepoHost`].
//! - [`executor`]: [`AgentExecutor`], truncation, retry, termination.
//! - [`manager`]: [`WorkerManager`] — spawn, monitor, reconcile, cleanup.
//! - [`worker`]: [`run_worker`], the child process entrypoint.

pub mod executor;
pub mod host;
pub mod llm;
pub mod manager;
pub mod message;
pub mod roles;
pub mod store;
pub mod task;
pub mod toolbox;
pub mod worker;

pub use executor::{AgentExecutor, AgentState, ExecutorConfig, ExecutorError};
pub use host::{FileModification, HostError, MockRepoHost, RepoHost};
pub use llm::{
    AnthropicClient, LlmClient, LlmError, LlmResponse, OpenAiClient, QueuedLlm,
    ScriptedResponse, ToolCall,
};
pub use manager::{ManagerConfig, ManagerError, WorkerManager};
pub use message::{ContentBlock, Message, MessageContent, Role};
pub use roles::RolePrompt;
pub use store::{LiveHandle, LogRecord, ProgressLogger, StoreError, SubtaskAllocation, TaskStore};
pub use task::{AgentKind, AgentStatus, EngineerOutput, ManagerOutput, PlannerOutput, TaskPayload};
pub use toolbox::{Tool, ToolError, ToolSpec, Toolbox, ToolboxConfig};
pub use worker::{run_worker, WorkerError, WorkerOptions};
