//! Agent runner surface: the execution collaborator for one task.
//!
//! Runners are opaque to the core — code generation, retrieval, report
//! writing all live behind [`AgentRunner`]. Runners are long-running
//! (seconds to minutes) and must observe the cancellation token in their
//! request promptly.

pub mod mock;
pub mod sub_action;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event_bus::{Event, EventBus};
use crate::model::LogEntry;
use crate::store::Store;
use crate::types::{LogLevel, MAX_SUB_ACTION_DEPTH};

/// Log persistence retry budget (log writes are the only store writes the
/// core silently retries).
const LOG_WRITE_ATTEMPTS: u32 = 3;
const LOG_RETRY_BACKOFF: Duration = Duration::from_millis(200);

// ============================================================================
// REQUEST / OUTCOME
// ============================================================================

/// Everything a runner needs to execute one task.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub task_id: String,
    pub action_id: String,
    pub prompt: String,
    /// Dependency task id -> serialized summary + artifact-reference block.
    pub upstream: HashMap<String, String>,
    pub model: Option<String>,
    /// Cancelled when the owning action run is cancelled. Runners must
    /// terminate promptly once this fires.
    pub cancel: CancellationToken,
}

/// Successful runner result.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub summary: String,
    /// Set by the sub-action runner: id of the spawned child action.
    pub sub_action_id: Option<String>,
}

impl AgentOutcome {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            sub_action_id: None,
        }
    }
}

/// Runner failure. Becomes the failed task's error message; never unwinds
/// out of a scheduler pass.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Runtime(String),

    #[error(
        "sub-action depth limit ({max}) reached; parent action depth={depth}",
        max = MAX_SUB_ACTION_DEPTH
    )]
    DepthLimit { depth: u32 },

    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),
}

/// Executes a single task with its prompt and upstream outputs.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        request: AgentRequest,
        logger: &TaskLogger,
    ) -> Result<AgentOutcome, AgentError>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Agent-type label -> runner, lock-free.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    runners: Arc<DashMap<String, Arc<dyn AgentRunner>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the runner for an agent type.
    pub fn register(&self, agent_type: impl Into<String>, runner: Arc<dyn AgentRunner>) {
        self.runners.insert(agent_type.into(), runner);
    }

    pub fn get(&self, agent_type: &str) -> Result<Arc<dyn AgentRunner>, AgentError> {
        self.runners
            .get(agent_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentError::UnknownAgentType(agent_type.to_string()))
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.runners.contains_key(agent_type)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("len", &self.runners.len())
            .finish()
    }
}

// ============================================================================
// TASK LOGGER
// ============================================================================

/// Log sink handed to runners: persists a line, then fans it out on the
/// event bus. Persistence is retried with a short backoff; the event is
/// published even when persistence ultimately fails.
#[derive(Clone)]
pub struct TaskLogger {
    store: Arc<dyn Store>,
    bus: EventBus,
    action_id: String,
    task_id: String,
}

impl TaskLogger {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        bus: EventBus,
        action_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            action_id: action_id.into(),
            task_id: task_id.into(),
        }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let entry = LogEntry::new(&self.task_id, level, &message);

        for attempt in 1..=LOG_WRITE_ATTEMPTS {
            match self.store.append_log(entry.clone()).await {
                Ok(()) => break,
                Err(err) if attempt < LOG_WRITE_ATTEMPTS => {
                    tracing::debug!(task_id = %self.task_id, %err, attempt, "log write failed, retrying");
                    tokio::time::sleep(LOG_RETRY_BACKOFF * attempt).await;
                }
                Err(err) => {
                    warn!(
                        task_id = %self.task_id,
                        %err,
                        message = crate::types::truncate_chars(&message, 80),
                        "failed to persist log line"
                    );
                }
            }
        }

        self.bus.publish(
            &self.action_id,
            Event::LogAppend {
                task_id: self.task_id.clone(),
                level,
                message,
            },
        );
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Artifact, Task, TaskOutput};
    use crate::store::{MemoryStore, StoreError};
    use crate::types::ActionStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn depth_limit_message_names_the_limit() {
        let err = AgentError::DepthLimit { depth: 3 };
        let msg = err.to_string();
        assert!(msg.contains("depth limit"), "got: {msg}");
        assert!(msg.contains("(3)"));
    }

    #[tokio::test]
    async fn registry_resolves_and_rejects() {
        let registry = AgentRegistry::new();
        registry.register("general", Arc::new(mock::MockAgent::new()));

        assert!(registry.contains("general"));
        assert!(registry.get("general").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(AgentError::UnknownAgentType(_))
        ));
    }

    #[tokio::test]
    async fn logger_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let mut sub = bus.subscribe("a1");
        let logger = TaskLogger::new(store.clone() as Arc<dyn Store>, bus.clone(), "a1", "t1");

        logger.info("fetching page 1").await;

        let logs = store.logs_for_task("t1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "fetching page 1");
        assert_eq!(logs[0].level, LogLevel::Info);

        match sub.recv().await.unwrap() {
            Event::LogAppend { task_id, level, message } => {
                assert_eq!(task_id, "t1");
                assert_eq!(level, LogLevel::Info);
                assert_eq!(message, "fetching page 1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Store that fails the first N log appends, delegating everything to
    /// a MemoryStore.
    struct FlakyLogStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Store for FlakyLogStore {
        async fn insert_action(&self, action: Action) -> Result<(), StoreError> {
            self.inner.insert_action(action).await
        }
        async fn action(&self, action_id: &str) -> Result<Action, StoreError> {
            self.inner.action(action_id).await
        }
        async fn set_action_status(
            &self,
            action_id: &str,
            status: ActionStatus,
        ) -> Result<(), StoreError> {
            self.inner.set_action_status(action_id, status).await
        }
        async fn bump_retry_count(&self, action_id: &str) -> Result<u32, StoreError> {
            self.inner.bump_retry_count(action_id).await
        }
        async fn child_actions(&self, parent_action_id: &str) -> Result<Vec<Action>, StoreError> {
            self.inner.child_actions(parent_action_id).await
        }
        async fn delete_action(&self, action_id: &str) -> Result<(), StoreError> {
            self.inner.delete_action(action_id).await
        }
        async fn insert_tasks(&self, tasks: Vec<Task>) -> Result<(), StoreError> {
            self.inner.insert_tasks(tasks).await
        }
        async fn task(&self, task_id: &str) -> Result<Task, StoreError> {
            self.inner.task(task_id).await
        }
        async fn tasks_for_action(&self, action_id: &str) -> Result<Vec<Task>, StoreError> {
            self.inner.tasks_for_action(action_id).await
        }
        async fn update_task(&self, task: Task) -> Result<(), StoreError> {
            self.inner.update_task(task).await
        }
        async fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
            self.inner.delete_task(task_id).await
        }
        async fn mark_tasks_running(
            &self,
            action_id: &str,
            task_ids: &[String],
        ) -> Result<(), StoreError> {
            self.inner.mark_tasks_running(action_id, task_ids).await
        }
        async fn set_task_completed(
            &self,
            task_id: &str,
            summary: &str,
            sub_action_id: Option<&str>,
        ) -> Result<(), StoreError> {
            self.inner
                .set_task_completed(task_id, summary, sub_action_id)
                .await
        }
        async fn set_task_failed(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
            self.inner.set_task_failed(task_id, error).await
        }
        async fn reset_tasks(
            &self,
            action_id: &str,
            task_ids: &[String],
        ) -> Result<(), StoreError> {
            self.inner.reset_tasks(action_id, task_ids).await
        }
        async fn link_sub_action(
            &self,
            task_id: &str,
            sub_action_id: &str,
        ) -> Result<(), StoreError> {
            self.inner.link_sub_action(task_id, sub_action_id).await
        }
        async fn upsert_output(&self, output: TaskOutput) -> Result<(), StoreError> {
            self.inner.upsert_output(output).await
        }
        async fn output_for_task(&self, task_id: &str) -> Result<Option<TaskOutput>, StoreError> {
            self.inner.output_for_task(task_id).await
        }
        async fn insert_artifact(&self, artifact: Artifact) -> Result<(), StoreError> {
            self.inner.insert_artifact(artifact).await
        }
        async fn artifacts_for_task(&self, task_id: &str) -> Result<Vec<Artifact>, StoreError> {
            self.inner.artifacts_for_task(task_id).await
        }
        async fn append_log(&self, entry: LogEntry) -> Result<(), StoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("transient".into()));
            }
            self.inner.append_log(entry).await
        }
        async fn logs_for_task(&self, task_id: &str) -> Result<Vec<LogEntry>, StoreError> {
            self.inner.logs_for_task(task_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logger_retries_transient_write_failures() {
        let store = Arc::new(FlakyLogStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(2),
        });
        let bus = EventBus::new();
        let mut sub = bus.subscribe("a1");
        let logger = TaskLogger::new(store.clone() as Arc<dyn Store>, bus.clone(), "a1", "t1");

        logger.warn("still going").await;

        // Third attempt landed.
        let logs = store.inner.logs_for_task("t1").await.unwrap();
        assert_eq!(logs.len(), 1);
        // The event is published regardless.
        assert!(matches!(sub.recv().await, Some(Event::LogAppend { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn logger_gives_up_but_still_publishes() {
        let store = Arc::new(FlakyLogStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(10),
        });
        let bus = EventBus::new();
        let mut sub = bus.subscribe("a1");
        let logger = TaskLogger::new(store.clone() as Arc<dyn Store>, bus.clone(), "a1", "t1");

        logger.error("lost line").await;

        assert!(store.inner.logs_for_task("t1").await.unwrap().is_empty());
        assert!(matches!(sub.recv().await, Some(Event::LogAppend { .. })));
    }
}
