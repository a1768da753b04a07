//! In-memory reference store.
//!
//! All maps live under one lock, so every trait call is one atomic update —
//! the same guarantee a transactional backend gives per call. Snapshots are
//! cloned out; callers never observe partial writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{Store, StoreError};
use crate::model::{Action, Artifact, LogEntry, Task, TaskOutput};
use crate::types::{ActionStatus, TaskStatus};

#[derive(Default)]
struct State {
    actions: HashMap<String, Action>,
    tasks: HashMap<String, Task>,
    /// Keyed by task id: at most one output per task.
    outputs: HashMap<String, TaskOutput>,
    artifacts: HashMap<String, Artifact>,
    logs: HashMap<String, Vec<LogEntry>>,
}

/// Thread-safe in-memory [`Store`], cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, StoreError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    fn action_mut(&mut self, action_id: &str) -> Result<&mut Action, StoreError> {
        self.actions
            .get_mut(action_id)
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_action(&self, action: Action) -> Result<(), StoreError> {
        self.state.write().actions.insert(action.id.clone(), action);
        Ok(())
    }

    async fn action(&self, action_id: &str) -> Result<Action, StoreError> {
        self.state
            .read()
            .actions
            .get(action_id)
            .cloned()
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))
    }

    async fn set_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let action = state.action_mut(action_id)?;
        action.status = status;
        action.updated_at = Utc::now();
        Ok(())
    }

    async fn bump_retry_count(&self, action_id: &str) -> Result<u32, StoreError> {
        let mut state = self.state.write();
        let action = state.action_mut(action_id)?;
        action.retry_count += 1;
        action.updated_at = Utc::now();
        Ok(action.retry_count)
    }

    async fn child_actions(&self, parent_action_id: &str) -> Result<Vec<Action>, StoreError> {
        let state = self.state.read();
        let mut children: Vec<Action> = state
            .actions
            .values()
            .filter(|a| a.parent_action_id.as_deref() == Some(parent_action_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }

    async fn delete_action(&self, action_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.actions.remove(action_id).is_none() {
            return Err(StoreError::ActionNotFound(action_id.to_string()));
        }
        let task_ids: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.action_id == action_id)
            .map(|t| t.id.clone())
            .collect();
        for task_id in &task_ids {
            state.tasks.remove(task_id);
            state.outputs.remove(task_id);
            state.logs.remove(task_id);
        }
        state
            .artifacts
            .retain(|_, artifact| artifact.action_id != action_id);
        Ok(())
    }

    async fn insert_tasks(&self, tasks: Vec<Task>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for task in tasks {
            state.tasks.insert(task.id.clone(), task);
        }
        Ok(())
    }

    async fn task(&self, task_id: &str) -> Result<Task, StoreError> {
        self.state
            .read()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn tasks_for_action(&self, action_id: &str) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.action_id == action_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(tasks)
    }

    async fn update_task(&self, mut task: Task) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskNotFound(task.id));
        }
        task.updated_at = Utc::now();
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.tasks.remove(task_id).is_none() {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        state.outputs.remove(task_id);
        state.logs.remove(task_id);
        Ok(())
    }

    async fn mark_tasks_running(
        &self,
        _action_id: &str,
        task_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        // Validate the whole batch before flipping anything.
        for task_id in task_ids {
            if !state.tasks.contains_key(task_id) {
                return Err(StoreError::TaskNotFound(task_id.clone()));
            }
        }
        for task_id in task_ids {
            let task = state.task_mut(task_id)?;
            task.status = TaskStatus::Running;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_task_completed(
        &self,
        task_id: &str,
        summary: &str,
        sub_action_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        task.status = TaskStatus::Completed;
        task.output_summary = Some(summary.to_string());
        if let Some(child) = sub_action_id {
            task.sub_action_id = Some(child.to_string());
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_task_failed(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        task.status = TaskStatus::Failed;
        task.output_summary = Some(error.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_tasks(&self, _action_id: &str, task_ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for task_id in task_ids {
            let Some(task) = state.tasks.get_mut(task_id) else {
                continue;
            };
            task.status = TaskStatus::Pending;
            task.output_summary = None;
            task.sub_action_id = None;
            task.updated_at = Utc::now();
        }
        for task_id in task_ids {
            state.outputs.remove(task_id);
        }
        Ok(())
    }

    async fn link_sub_action(
        &self,
        task_id: &str,
        sub_action_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let task = state.task_mut(task_id)?;
        task.sub_action_id = Some(sub_action_id.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_output(&self, output: TaskOutput) -> Result<(), StoreError> {
        self.state
            .write()
            .outputs
            .insert(output.task_id.clone(), output);
        Ok(())
    }

    async fn output_for_task(&self, task_id: &str) -> Result<Option<TaskOutput>, StoreError> {
        Ok(self.state.read().outputs.get(task_id).cloned())
    }

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), StoreError> {
        self.state
            .write()
            .artifacts
            .insert(artifact.id.clone(), artifact);
        Ok(())
    }

    async fn artifacts_for_task(&self, task_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let state = self.state.read();
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect();
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(artifacts)
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), StoreError> {
        self.state
            .write()
            .logs
            .entry(entry.task_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn logs_for_task(&self, task_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .logs
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }
}
