//! `foreman`: manager daemon and task administration.

use clap::{Parser, Subcommand, ValueEnum};
use foreman::manager::{default_worker_exe, ManagerConfig, WorkerManager};
use foreman::store::AGENT_LOGGER;
use foreman::{AgentKind, TaskStore};
use foreman_cli::{init_tracing, Settings, WORKER_EXE_ENV};

#[derive(Parser)]
#[command(name = "foreman", about = "Orchestrate LLM-agent task executions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Planner,
    Manager,
    Engineer,
}

impl From<KindArg> for AgentKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Planner => AgentKind::Planner,
            KindArg::Manager => AgentKind::Manager,
            KindArg::Engineer => AgentKind::Engineer,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the manager: supervise workers until interrupted.
    Serve,
    /// Create a task and spawn its worker.
    Create {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, short = 'd')]
        description: String,
        /// Repository name; repeat for multi-repo planner tasks.
        #[arg(long = "repo", required = true)]
        repos: Vec<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Create a Manager task for one item of a completed planner's plan.
    Subtask {
        parent_run_id: String,
        index: usize,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// List task rows.
    List,
    /// List supported model providers and their known models.
    Models,
    /// Print one task's payload.
    Show { run_id: String },
    /// Print one run's progress log.
    Logs { run_id: String },
    /// Print recent operator debug messages.
    Debug {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Terminate (if running) and delete a task with its logs.
    Remove { run_id: String },
}

fn build_manager(settings: &Settings) -> Result<WorkerManager, Box<dyn std::error::Error>> {
    let store = TaskStore::open(&settings.db_path)?;
    let worker_exe = match std::env::var(WORKER_EXE_ENV) {
        Ok(path) => path.into(),
        Err(_) => default_worker_exe()?,
    };
    Ok(WorkerManager::new(ManagerConfig {
        store,
        connected_repos: settings.connected_repos.clone(),
        logs_dir: settings.logs_dir.clone(),
        worker_exe,
    })?)
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_config::load_and_apply("foreman", None)?;
    init_tracing();
    let settings = Settings::from_env();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let manager = build_manager(&settings)?;
            tracing::info!(db = %settings.db_path.display(), "manager serving");
            tokio::select! {
                _ = manager.monitor_loop() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                }
            }
            tokio::task::spawn_blocking(move || manager.shutdown()).await?;
        }
        Command::Create {
            kind,
            description,
            repos,
            provider,
            model,
        } => {
            let manager = build_manager(&settings)?;
            let run_id = tokio::task::spawn_blocking(move || {
                manager.create_task(
                    kind.into(),
                    &description,
                    &repos,
                    provider.as_deref(),
                    model.as_deref(),
                )
            })
            .await??;
            println!("{run_id}");
        }
        Command::Subtask {
            parent_run_id,
            index,
            provider,
            model,
        } => {
            let manager = build_manager(&settings)?;
            let run_id = tokio::task::spawn_blocking(move || {
                manager.create_subtask_task(
                    &parent_run_id,
                    index,
                    provider.as_deref(),
                    model.as_deref(),
                )
            })
            .await??;
            println!("{run_id}");
        }
        Command::List => {
            let store = TaskStore::open(&settings.db_path)?;
            for (task_id, payload) in store.get_all_active_tasks()? {
                println!(
                    "{task_id}  {}  {}  {}",
                    payload
                        .get("agent_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?"),
                    payload
                        .get("agent_status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?"),
                    payload
                        .get("updated_at")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?"),
                );
            }
        }
        Command::Models => {
            use foreman::llm::registry;
            for provider in [registry::PROVIDER_ANTHROPIC, registry::PROVIDER_OPENAI] {
                println!("{provider}:");
                for model in registry::models_for_provider(provider).unwrap_or_default() {
                    println!("  {model}");
                }
            }
        }
        Command::Show { run_id } => {
            let store = TaskStore::open(&settings.db_path)?;
            match store.get_active_task(&run_id)? {
                Some(payload) => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::Value::Object(payload))?
                ),
                None => {
                    eprintln!("task not found: {run_id}");
                    std::process::exit(1);
                }
            }
        }
        Command::Logs { run_id } => {
            let store = TaskStore::open(&settings.db_path)?;
            match store.load_log(&run_id, AGENT_LOGGER)? {
                Some(doc) => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::Value::Object(doc))?
                ),
                None => {
                    eprintln!("no log for run: {run_id}");
                    std::process::exit(1);
                }
            }
        }
        Command::Debug { limit } => {
            let store = TaskStore::open(&settings.db_path)?;
            for message in store.get_debug_messages(limit)? {
                println!("{message}");
            }
        }
        Command::Remove { run_id } => {
            let manager = build_manager(&settings)?;
            tokio::task::spawn_blocking(move || manager.remove_task(&run_id)).await??;
        }
    }
    Ok(())
}
