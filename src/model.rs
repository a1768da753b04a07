//! Persisted rows: Action, Task, TaskOutput, Artifact, LogEntry.
//!
//! Rows are plain value types addressed by string uuids. Back references
//! (task -> dependency, child action -> parent) are ids, never owning
//! pointers; the executor works on snapshots and commits mutations through
//! the [`Store`](crate::store::Store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ActionStatus, LogLevel, TaskStatus};

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// ACTION
// ============================================================================

/// Root of a task DAG: one user-submitted goal.
///
/// Invariant: `depth == 0` iff the action has no parent. Status is mutated
/// only by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub title: String,
    pub root_prompt: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_action_id: Option<String>,
    pub parent_task_id: Option<String>,
    /// Free-form description of the output the creator expects.
    pub output_contract: Option<String>,
    pub depth: u32,
    pub retry_count: u32,
}

impl Action {
    /// Create a top-level draft action.
    pub fn new(title: impl Into<String>, root_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            root_prompt: root_prompt.into(),
            status: ActionStatus::Draft,
            created_at: now,
            updated_at: now,
            parent_action_id: None,
            parent_task_id: None,
            output_contract: None,
            depth: 0,
            retry_count: 0,
        }
    }

    /// Create a child action spawned by a sub-action task of `parent`.
    pub fn child_of(
        parent: &Action,
        parent_task_id: &str,
        title: impl Into<String>,
        root_prompt: impl Into<String>,
        output_contract: impl Into<String>,
    ) -> Self {
        let mut action = Action::new(title, root_prompt);
        action.parent_action_id = Some(parent.id.clone());
        action.parent_task_id = Some(parent_task_id.to_string());
        action.output_contract = Some(output_contract.into());
        action.depth = parent.depth + 1;
        action
    }
}

// ============================================================================
// TASK
// ============================================================================

/// One node of an action's DAG.
///
/// Dependencies reference earlier tasks of the same action. A task is ready
/// when it is pending and every dependency is completed; it fails
/// immediately once any dependency is failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub action_id: String,
    pub prompt: String,
    pub agent_type: String,
    pub model: Option<String>,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub output_summary: Option<String>,
    /// Set iff this task spawned a child action.
    pub sub_action_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        action_id: impl Into<String>,
        prompt: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            action_id: action_id.into(),
            prompt: prompt.into(),
            agent_type: agent_type.into(),
            model: None,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            output_summary: None,
            sub_action_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

// ============================================================================
// TASK OUTPUT
// ============================================================================

/// Result payload of a completed task (0 or 1 per task; replaced on re-run,
/// deleted on invalidation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub id: String,
    pub task_id: String,
    pub text: Option<String>,
    pub artifact_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskOutput {
    pub fn new(task_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.into(),
            text: Some(text.into()),
            artifact_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_artifacts(mut self, artifact_ids: Vec<String>) -> Self {
        self.artifact_ids = artifact_ids;
        self
    }
}

// ============================================================================
// ARTIFACT
// ============================================================================

/// Binary or textual blob produced by a task run. Overwritten on re-run;
/// not proactively deleted on invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub task_id: String,
    pub action_id: String,
    /// Coarse kind label: "file", "image", "markdown", ...
    pub kind: String,
    pub mime_type: Option<String>,
    pub storage_path: Option<String>,
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        task_id: impl Into<String>,
        action_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.into(),
            action_id: action_id.into(),
            kind: kind.into(),
            mime_type: None,
            storage_path: None,
            size_bytes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_storage(mut self, path: impl Into<String>, size_bytes: u64) -> Self {
        self.storage_path = Some(path.into());
        self.size_bytes = Some(size_bytes);
        self
    }
}

// ============================================================================
// LOG ENTRY
// ============================================================================

/// Append-only timestamped log line attached to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub structured: Option<Value>,
}

impl LogEntry {
    pub fn new(task_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            task_id: task_id.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
            structured: None,
        }
    }

    pub fn with_structured(mut self, payload: Value) -> Self {
        self.structured = Some(payload);
        self
    }
}
