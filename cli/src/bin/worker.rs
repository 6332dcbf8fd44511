//! `foreman-worker <run_id>`: the child process entrypoint.
//!
//! Exit code 0 means the worker believes the task succeeded; non-zero means
//! it failed. Either way the row's own status is the ground truth — the
//! manager reconciles from the exit code only when the row still shows
//! Running.

use foreman::{run_worker, ExecutorConfig, TaskStore, WorkerOptions};
use foreman_cli::{init_tracing, resolve_host, Settings};

#[tokio::main]
async fn main() {
    let Some(run_id) = std::env::args().nth(1) else {
        eprintln!("usage: foreman-worker <run_id>");
        std::process::exit(2);
    };

    if let Err(e) = env_config::load_and_apply("foreman", None) {
        eprintln!("config load failed: {e}");
        std::process::exit(2);
    }
    init_tracing();
    tracing::info!(%run_id, pid = std::process::id(), "worker process starting");

    let settings = Settings::from_env();
    let store = match TaskStore::open(&settings.db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("store open failed: {e}");
            std::process::exit(2);
        }
    };
    let host = match resolve_host() {
        Ok(host) => host,
        Err(e) => {
            eprintln!("host setup failed: {e}");
            std::process::exit(2);
        }
    };

    let options = WorkerOptions {
        store,
        host,
        state_dir: settings.state_dir,
        llm_override: None,
        executor_config: ExecutorConfig::default(),
    };

    match run_worker(options, &run_id).await {
        Ok(()) => {
            tracing::info!(%run_id, "worker process done");
        }
        Err(e) => {
            tracing::error!(%run_id, error = %e, "worker process failed");
            std::process::exit(1);
        }
    }
}
