//! SQLite-backed task store: durable task payloads, per-run progress logs,
//! a bounded debug ring and pre-allocated sub-task ids.
//!
//! Every operation opens its own connection with WAL journaling and a busy
//! timeout, so the manager process, every worker process and the surrounding
//! API can read and write concurrently without application-level locking.
//! Statements are single-row and short; async callers that sit on a
//! latency-sensitive loop wrap calls in `spawn_blocking`.
//!
//! Mutable views with write debouncing are handed out as [`LiveHandle`]s
//! (see [`live`]); append-only conversation logs go through
//! [`ProgressLogger`] (see [`progress`]).

pub mod live;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

pub use live::{LiveHandle, SaveFn, DEFAULT_DEBOUNCE_INTERVAL};
pub use progress::{ProgressLogger, AGENT_LOGGER};

use crate::task::{epoch_seconds, JsonMap};

/// Debug ring capacity: older messages are pruned past this count.
const DEBUG_RING_CAPACITY: i64 = 500;

/// Store operation failure. Never swallowed; callers decide whether a failure
/// is fatal (task transitions) or tolerable (debug messages).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("row missing: {0}")]
    RowMissing(String),
}

/// One `task_logs` row.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub task_id: String,
    pub run_id: String,
    pub agent_type: String,
    pub log_data: JsonMap,
    pub created_at: String,
    pub updated_at: String,
}

/// One pre-allocated sub-task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskAllocation {
    pub subtask_id: String,
    pub subtask_index: usize,
    pub agent_type: String,
}

/// Handle to the SQLite task database. Cheap to clone; connections are opened
/// per operation (WAL makes cross-process access safe).
#[derive(Clone)]
pub struct TaskStore {
    db_path: PathBuf,
}

impl TaskStore {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: path.as_ref().to_path_buf(),
        };
        store.init_schema()?;
        tracing::debug!(db = %store.db_path.display(), "task store opened");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS active_tasks (
                task_id TEXT PRIMARY KEY,
                payload JSON NOT NULL,
                run_ids JSON DEFAULT '[]',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS task_logs (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                log_data JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(run_id, agent_type)
            );
            CREATE TABLE IF NOT EXISTS debug_messages (
                message_id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS subtask_ids (
                fullstack_run_id TEXT NOT NULL,
                subtask_index INTEGER NOT NULL,
                subtask_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (fullstack_run_id, subtask_index)
            );
            "#,
        )?;
        Ok(())
    }

    // --- active tasks -----------------------------------------------------

    /// Upserts a task row with an empty `run_ids` list.
    pub fn add_active_task(&self, task_id: &str, payload: &JsonMap) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO active_tasks (task_id, payload, run_ids, updated_at)
             VALUES (?1, ?2, '[]', CURRENT_TIMESTAMP)",
            params![task_id, serde_json::to_string(payload)?],
        )?;
        tracing::debug!(task_id, "added active task");
        Ok(())
    }

    pub fn get_active_task(&self, task_id: &str) -> Result<Option<JsonMap>, StoreError> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM active_tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All task rows as `(task_id, payload)` pairs.
    pub fn get_all_active_tasks(&self) -> Result<Vec<(String, JsonMap)>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT task_id, payload FROM active_tasks")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (task_id, raw) = row?;
            out.push((task_id, serde_json::from_str(&raw)?));
        }
        Ok(out)
    }

    pub fn update_active_task(&self, task_id: &str, payload: &JsonMap) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE active_tasks SET payload = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE task_id = ?2",
            params![serde_json::to_string(payload)?, task_id],
        )?;
        Ok(())
    }

    /// Appends `run_id` to the task's `run_ids` list, preserving order and
    /// dropping repeats. A missing task is logged and tolerated.
    pub fn add_run_id_to_task(&self, task_id: &str, run_id: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT run_ids FROM active_tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            tracing::warn!(task_id, run_id, "task not found when adding run id");
            return Ok(());
        };
        let mut run_ids: Vec<String> = serde_json::from_str(&raw)?;
        if !run_ids.iter().any(|r| r == run_id) {
            run_ids.push(run_id.to_string());
            conn.execute(
                "UPDATE active_tasks SET run_ids = ?1, updated_at = CURRENT_TIMESTAMP
                 WHERE task_id = ?2",
                params![serde_json::to_string(&run_ids)?, task_id],
            )?;
        }
        Ok(())
    }

    pub fn get_task_run_ids(&self, task_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT run_ids FROM active_tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn remove_active_task(&self, task_id: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM active_tasks WHERE task_id = ?1",
            params![task_id],
        )?;
        tracing::debug!(task_id, "removed active task");
        Ok(())
    }

    // --- task logs --------------------------------------------------------

    /// Insert-or-replace on `(run_id, agent_type)`; the whole document is
    /// overwritten with the latest JSON (last-writer-wins).
    pub fn save_log(
        &self,
        task_id: &str,
        run_id: &str,
        agent_type: &str,
        log_data: &JsonMap,
    ) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO task_logs (task_id, run_id, agent_type, log_data, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            params![task_id, run_id, agent_type, serde_json::to_string(log_data)?],
        )?;
        Ok(())
    }

    /// Most recent log document for `(run_id, agent_type)`, or `None`.
    pub fn load_log(&self, run_id: &str, agent_type: &str) -> Result<Option<JsonMap>, StoreError> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT log_data FROM task_logs
                 WHERE run_id = ?1 AND agent_type = ?2
                 ORDER BY updated_at DESC LIMIT 1",
                params![run_id, agent_type],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn get_all_logs_for_task(&self, task_id: &str) -> Result<Vec<LogRecord>, StoreError> {
        self.query_logs(
            "SELECT task_id, run_id, agent_type, log_data, created_at, updated_at
             FROM task_logs WHERE task_id = ?1
             ORDER BY created_at DESC, log_id DESC",
            task_id,
        )
    }

    pub fn get_all_logs_for_run(&self, run_id: &str) -> Result<Vec<LogRecord>, StoreError> {
        self.query_logs(
            "SELECT task_id, run_id, agent_type, log_data, created_at, updated_at
             FROM task_logs WHERE run_id = ?1
             ORDER BY created_at DESC, log_id DESC",
            run_id,
        )
    }

    fn query_logs(&self, sql: &str, key: &str) -> Result<Vec<LogRecord>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (task_id, run_id, agent_type, raw, created_at, updated_at) = row?;
            out.push(LogRecord {
                task_id,
                run_id,
                agent_type,
                log_data: serde_json::from_str(&raw)?,
                created_at,
                updated_at,
            });
        }
        Ok(out)
    }

    /// Deletes every log row attached to `task_id`.
    pub fn remove_logs_for_task(&self, task_id: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM task_logs WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }

    // --- debug ring -------------------------------------------------------

    /// Appends an operator-level debug message and prunes the ring.
    pub fn add_debug_message(&self, message: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO debug_messages (message) VALUES (?1)",
            params![message],
        )?;
        conn.execute(
            "DELETE FROM debug_messages WHERE message_id <=
               (SELECT MAX(message_id) FROM debug_messages) - ?1",
            params![DEBUG_RING_CAPACITY],
        )?;
        Ok(())
    }

    /// Most recent debug messages, in chronological order.
    pub fn get_debug_messages(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT message FROM debug_messages ORDER BY message_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = rows.collect::<Result<Vec<_>, _>>()?;
        out.reverse();
        Ok(out)
    }

    // --- sub-task ids -----------------------------------------------------

    /// Pre-allocates `n` sub-task ids for a completed planner run, one batch,
    /// idempotent per `(fullstack_run_id, index)`: an existing row keeps its
    /// id, so re-running returns the identical allocation.
    pub fn pre_generate_subtask_ids(
        &self,
        fullstack_run_id: &str,
        num_subtasks: usize,
    ) -> Result<Vec<SubtaskAllocation>, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let epoch = epoch_seconds();
        let mut out = Vec::with_capacity(num_subtasks);
        for idx in 0..num_subtasks {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT subtask_id FROM subtask_ids
                     WHERE fullstack_run_id = ?1 AND subtask_index = ?2",
                    params![fullstack_run_id, idx as i64],
                    |row| row.get(0),
                )
                .optional()?;
            let subtask_id =
                existing.unwrap_or_else(|| format!("pm_subtask_{epoch}_{idx}"));
            tx.execute(
                "INSERT OR REPLACE INTO subtask_ids
                 (fullstack_run_id, subtask_index, subtask_id, agent_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![fullstack_run_id, idx as i64, subtask_id, "Manager"],
            )?;
            out.push(SubtaskAllocation {
                subtask_id,
                subtask_index: idx,
                agent_type: "Manager".to_string(),
            });
        }
        tx.commit()?;
        Ok(out)
    }

    /// All allocations for a planner run, ordered by index.
    pub fn get_subtask_ids(
        &self,
        fullstack_run_id: &str,
    ) -> Result<Vec<SubtaskAllocation>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT subtask_id, subtask_index, agent_type FROM subtask_ids
             WHERE fullstack_run_id = ?1 ORDER BY subtask_index",
        )?;
        let rows = stmt.query_map(params![fullstack_run_id], |row| {
            Ok(SubtaskAllocation {
                subtask_id: row.get(0)?,
                subtask_index: row.get::<_, i64>(1)? as usize,
                agent_type: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_subtask_id(
        &self,
        fullstack_run_id: &str,
        subtask_index: usize,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.connection()?;
        Ok(conn
            .query_row(
                "SELECT subtask_id FROM subtask_ids
                 WHERE fullstack_run_id = ?1 AND subtask_index = ?2",
                params![fullstack_run_id, subtask_index as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    // --- live handles -----------------------------------------------------

    /// Live handle over an existing task row, or `None` when absent.
    pub fn task_handle(&self, task_id: &str) -> Result<Option<LiveHandle>, StoreError> {
        let Some(payload) = self.get_active_task(task_id)? else {
            return Ok(None);
        };
        Ok(Some(LiveHandle::new(payload, self.task_save_fn(task_id))))
    }

    /// Creates the row and returns a live handle over it.
    pub fn create_task_handle(
        &self,
        task_id: &str,
        payload: JsonMap,
    ) -> Result<LiveHandle, StoreError> {
        self.add_active_task(task_id, &payload)?;
        Ok(LiveHandle::new(payload, self.task_save_fn(task_id)))
    }

    /// Creates (or overwrites) a log row and returns a live handle over it.
    pub fn log_handle(
        &self,
        task_id: &str,
        run_id: &str,
        agent_type: &str,
        log_data: JsonMap,
    ) -> Result<LiveHandle, StoreError> {
        self.save_log(task_id, run_id, agent_type, &log_data)?;
        let store = self.clone();
        let (task_id, run_id, agent_type) = (
            task_id.to_string(),
            run_id.to_string(),
            agent_type.to_string(),
        );
        let save: SaveFn =
            Arc::new(move |data: &JsonMap| store.save_log(&task_id, &run_id, &agent_type, data));
        Ok(LiveHandle::new(log_data, save))
    }

    fn task_save_fn(&self, task_id: &str) -> SaveFn {
        let store = self.clone();
        let task_id = task_id.to_string();
        Arc::new(move |data: &JsonMap| store.update_active_task(&task_id, data))
    }
}
