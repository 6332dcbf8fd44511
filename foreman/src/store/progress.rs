//! Per-run progress log: an append-only conversation document persisted
//! through a debounced live handle.
//!
//! One document exists per `(run_id, logger_name)`; the worker appends every
//! system, assistant and tool-result message as it happens, so the HTTP/UI
//! layer can follow a run live. Messages keep the order they were appended;
//! under SIGKILL at most the last not-yet-flushed message is lost.

use serde_json::{json, Value};

use crate::message::Message;
use crate::store::{LiveHandle, StoreError, TaskStore};
use crate::task::{timestamp_now, JsonMap};

/// Logger name under which the agent conversation is stored.
pub const AGENT_LOGGER: &str = "agent_logger";

/// Append-only progress log for one run.
pub struct ProgressLogger {
    handle: LiveHandle,
    run_id: String,
    task_id: String,
}

impl ProgressLogger {
    /// Opens (or creates) the progress document for `run_id`. A fresh
    /// document registers the run with its task's `run_ids` list; an existing
    /// one is resumed as-is so earlier entries keep their order.
    pub fn new(store: &TaskStore, run_id: &str, task_id: Option<&str>) -> Result<Self, StoreError> {
        let task_id = task_id.unwrap_or(run_id).to_string();

        let handle = match store.load_log(run_id, AGENT_LOGGER)? {
            Some(existing) => store.log_handle(&task_id, run_id, AGENT_LOGGER, existing)?,
            None => {
                let mut doc = JsonMap::new();
                doc.insert("task_id".to_string(), json!(task_id));
                doc.insert("run_id".to_string(), json!(run_id));
                doc.insert("last_updated".to_string(), json!(timestamp_now()));
                doc.insert("progress".to_string(), json!([]));
                let handle = store.log_handle(&task_id, run_id, AGENT_LOGGER, doc)?;
                store.add_run_id_to_task(&task_id, run_id)?;
                tracing::info!(task_id = %task_id, run_id, "initialized progress log");
                handle
            }
        };

        Ok(Self {
            handle,
            run_id: run_id.to_string(),
            task_id,
        })
    }

    /// Appends one message and stamps `last_updated`. Persistence is
    /// debounced by the underlying handle.
    pub fn log_message(&self, message: &Message) {
        let value = message.to_value();
        tracing::debug!(
            task_id = %self.task_id,
            run_id = %self.run_id,
            role = ?message.role,
            "progress message"
        );
        self.handle.update_with(|doc| {
            match doc.get_mut("progress") {
                Some(Value::Array(items)) => items.push(value),
                _ => {
                    doc.insert("progress".to_string(), json!([value]));
                }
            }
            doc.insert("last_updated".to_string(), json!(timestamp_now()));
        });
    }

    /// Copy of the current log document.
    pub fn document(&self) -> JsonMap {
        self.handle.snapshot()
    }

    pub fn force_flush(&self) -> Result<(), StoreError> {
        self.handle.force_flush()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.db")).unwrap();
        (dir, store)
    }

    /// **Scenario**: messages appear in the persisted document in append order,
    /// and the first message of a run is the system message.
    #[test]
    fn messages_persist_in_order() {
        let (_dir, store) = temp_store();
        let logger = ProgressLogger::new(&store, "run_1", None).unwrap();
        logger.log_message(&Message::system("prompt"));
        logger.log_message(&Message::user("do the thing"));
        logger.log_message(&Message::assistant("on it", &[]));
        logger.force_flush().unwrap();

        let doc = store.load_log("run_1", AGENT_LOGGER).unwrap().unwrap();
        let progress = doc["progress"].as_array().unwrap();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0]["role"], json!("system"));
        assert_eq!(progress[1]["role"], json!("user"));
        assert_eq!(progress[2]["role"], json!("assistant"));
    }

    /// **Scenario**: a fresh logger registers its run id with the owning task;
    /// reopening resumes the existing document without losing entries.
    #[test]
    fn fresh_logger_registers_run_and_resumes() {
        let (_dir, store) = temp_store();
        let mut payload = JsonMap::new();
        payload.insert("run_id".into(), json!("task_7"));
        store.add_active_task("task_7", &payload).unwrap();

        let logger = ProgressLogger::new(&store, "run_7", Some("task_7")).unwrap();
        logger.log_message(&Message::system("s"));
        logger.force_flush().unwrap();
        assert_eq!(store.get_task_run_ids("task_7").unwrap(), vec!["run_7"]);

        let resumed = ProgressLogger::new(&store, "run_7", Some("task_7")).unwrap();
        resumed.log_message(&Message::user("u"));
        resumed.force_flush().unwrap();

        let doc = store.load_log("run_7", AGENT_LOGGER).unwrap().unwrap();
        assert_eq!(doc["progress"].as_array().unwrap().len(), 2);
        // Re-registration does not duplicate the run id.
        assert_eq!(store.get_task_run_ids("task_7").unwrap(), vec!["run_7"]);
    }
}
