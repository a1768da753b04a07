//! Store contract: the persistence collaborator consumed by the core.
//!
//! The store is the authoritative state. Every status flip goes through it;
//! in-memory task views are snapshots, never shared mutable state. Each
//! trait method is a single atomic update — implementations backed by a
//! database should wrap each call in one transaction scoped to the action.
//! Cross-action transactions are never assumed.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Action, Artifact, LogEntry, Task, TaskOutput};
use crate::types::ActionStatus;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Transient backend failure. Only log appends are retried on this;
    /// status transitions surface it and terminate the run.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted CRUD over actions, tasks, outputs, artifacts, and logs.
#[async_trait]
pub trait Store: Send + Sync {
    // ── actions ─────────────────────────────────────────────────────────

    async fn insert_action(&self, action: Action) -> Result<(), StoreError>;

    async fn action(&self, action_id: &str) -> Result<Action, StoreError>;

    async fn set_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
    ) -> Result<(), StoreError>;

    /// Increment the recovery counter, returning the new value.
    async fn bump_retry_count(&self, action_id: &str) -> Result<u32, StoreError>;

    /// Direct children of an action (spawned by its sub-action tasks).
    async fn child_actions(&self, parent_action_id: &str) -> Result<Vec<Action>, StoreError>;

    /// Delete an action and every row it owns (tasks, outputs, artifacts,
    /// logs). Child actions are separate roots; the orchestrator cascades
    /// over them explicitly.
    async fn delete_action(&self, action_id: &str) -> Result<(), StoreError>;

    // ── tasks ───────────────────────────────────────────────────────────

    async fn insert_tasks(&self, tasks: Vec<Task>) -> Result<(), StoreError>;

    async fn task(&self, task_id: &str) -> Result<Task, StoreError>;

    /// Consistent snapshot of all tasks of one action, ordered by creation.
    async fn tasks_for_action(&self, action_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Replace a task row (prompt, agent type, dependencies, model,
    /// status, ...). The row must already exist.
    async fn update_task(&self, task: Task) -> Result<(), StoreError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), StoreError>;

    /// Atomically flip every listed task to `running`. This is the sole
    /// guard against duplicate dispatch under concurrent scheduler passes.
    async fn mark_tasks_running(
        &self,
        action_id: &str,
        task_ids: &[String],
    ) -> Result<(), StoreError>;

    async fn set_task_completed(
        &self,
        task_id: &str,
        summary: &str,
        sub_action_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_task_failed(&self, task_id: &str, error: &str) -> Result<(), StoreError>;

    /// Atomically reset the listed tasks to `pending`: clear the output
    /// summary and sub-action link, delete their outputs. Artifacts are
    /// left in place (overwritten on re-run).
    async fn reset_tasks(&self, action_id: &str, task_ids: &[String]) -> Result<(), StoreError>;

    /// Record the child action spawned by a sub-action task.
    async fn link_sub_action(&self, task_id: &str, sub_action_id: &str)
        -> Result<(), StoreError>;

    // ── outputs & artifacts ─────────────────────────────────────────────

    /// Write the 0-or-1 output row for a task, replacing any prior one.
    async fn upsert_output(&self, output: TaskOutput) -> Result<(), StoreError>;

    async fn output_for_task(&self, task_id: &str) -> Result<Option<TaskOutput>, StoreError>;

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), StoreError>;

    async fn artifacts_for_task(&self, task_id: &str) -> Result<Vec<Artifact>, StoreError>;

    // ── logs ────────────────────────────────────────────────────────────

    /// Append one log line. Must tolerate concurrent writers.
    async fn append_log(&self, entry: LogEntry) -> Result<(), StoreError>;

    async fn logs_for_task(&self, task_id: &str) -> Result<Vec<LogEntry>, StoreError>;
}
