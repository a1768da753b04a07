//! Planner contract: initial DAG decomposition and recovery sub-plans.
//!
//! The planner is an external collaborator (typically LLM-backed). The core
//! validates whatever it returns and falls back to a single-task plan when
//! initial planning fails; recovery planning failures are treated as
//! non-recoverable for the task at hand.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Task;
use crate::types::agent_type;

/// Upper bound on replacement tasks per recovery plan.
pub const MAX_REPLACEMENT_TASKS: usize = 3;

/// One planned task. Dependencies are 0-based indices into the plan and
/// must reference strictly earlier entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub prompt: String,
    pub agent_type: String,
    #[serde(default)]
    pub dependencies: Vec<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

impl TaskSpec {
    pub fn new(prompt: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_type: agent_type.into(),
            dependencies: Vec::new(),
            model: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<usize>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// One replacement task proposed for a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementSpec {
    pub prompt: String,
    pub agent_type: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl ReplacementSpec {
    pub fn new(prompt: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent_type: agent_type.into(),
            model: None,
        }
    }
}

/// Recovery planner response. An empty `tasks` list means the failure is
/// not recoverable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tasks: Vec<ReplacementSpec>,
}

/// Context handed to the recovery planner for one root-cause failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRequest {
    pub root_prompt: String,
    pub failed_prompt: String,
    pub failed_agent_type: String,
    pub error: String,
    /// Truncated summaries of completed upstream tasks, in dependency order.
    pub upstream_summaries: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner backend error: {0}")]
    Backend(String),

    #[error("planner returned an invalid DAG: {0}")]
    InvalidPlan(String),
}

/// Decomposes prompts into task DAGs and proposes replacements for failed
/// tasks.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, root_prompt: &str) -> Result<Vec<TaskSpec>, PlanError>;

    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryPlan, PlanError>;
}

// ============================================================================
// VALIDATION / MATERIALIZATION
// ============================================================================

/// Check plan shape: non-empty, non-blank prompts, dependencies referencing
/// strictly earlier entries only.
pub fn validate_plan(specs: &[TaskSpec]) -> Result<(), PlanError> {
    if specs.is_empty() {
        return Err(PlanError::InvalidPlan("plan contains no tasks".into()));
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.prompt.trim().is_empty() {
            return Err(PlanError::InvalidPlan(format!("task {i} has an empty prompt")));
        }
        for &dep in &spec.dependencies {
            if dep >= i {
                return Err(PlanError::InvalidPlan(format!(
                    "task {i} references dependency {dep}, which is not an earlier task"
                )));
            }
        }
    }
    Ok(())
}

/// The plan used when the planner fails or returns garbage: one `general`
/// task echoing the root prompt.
pub fn fallback_plan(root_prompt: &str) -> Vec<TaskSpec> {
    vec![TaskSpec::new(root_prompt, agent_type::GENERAL)]
}

/// Turn validated specs into task rows for `action_id`, resolving index
/// dependencies to task ids. Creation timestamps are staggered so each
/// dependency is strictly older than its dependent.
pub fn materialize(action_id: &str, specs: &[TaskSpec]) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let dependencies = spec
            .dependencies
            .iter()
            .map(|&dep| tasks[dep].id.clone())
            .collect();
        let mut task = Task::new(action_id, &spec.prompt, &spec.agent_type)
            .with_dependencies(dependencies);
        task.model = spec.model.clone();
        task.created_at += Duration::microseconds(i as i64);
        task.updated_at = task.created_at;
        tasks.push(task);
    }
    tasks
}

// ============================================================================
// STATIC PLANNER
// ============================================================================

/// Planner with canned responses. Used in tests and offline deployments
/// (the no-backend fallback path).
pub struct StaticPlanner {
    plan: Vec<TaskSpec>,
    recoveries: Mutex<VecDeque<RecoveryPlan>>,
    recovery_requests: Mutex<Vec<RecoveryRequest>>,
}

impl StaticPlanner {
    /// Always answers `plan` for initial planning and "not recoverable"
    /// for recovery until plans are queued.
    pub fn new(plan: Vec<TaskSpec>) -> Self {
        Self {
            plan,
            recoveries: Mutex::new(VecDeque::new()),
            recovery_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_recovery(self, plan: RecoveryPlan) -> Self {
        self.queue_recovery(plan);
        self
    }

    /// Queue a recovery plan (FIFO across `recover` calls).
    pub fn queue_recovery(&self, plan: RecoveryPlan) {
        self.recoveries.lock().unwrap().push_back(plan);
    }

    /// All recovery requests seen so far (for assertions).
    pub fn recovery_requests(&self) -> Vec<RecoveryRequest> {
        self.recovery_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _root_prompt: &str) -> Result<Vec<TaskSpec>, PlanError> {
        Ok(self.plan.clone())
    }

    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryPlan, PlanError> {
        self.recovery_requests.lock().unwrap().push(request);
        Ok(self
            .recoveries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_backward_deps() {
        let specs = vec![
            TaskSpec::new("fetch", agent_type::DATA_RETRIEVAL),
            TaskSpec::new("analyze", agent_type::CODE_EXECUTION).with_dependencies(vec![0]),
            TaskSpec::new("report", agent_type::REPORT).with_dependencies(vec![0, 1]),
        ];
        assert!(validate_plan(&specs).is_ok());
    }

    #[test]
    fn validate_rejects_forward_and_self_refs() {
        let forward = vec![
            TaskSpec::new("a", "general").with_dependencies(vec![1]),
            TaskSpec::new("b", "general"),
        ];
        assert!(validate_plan(&forward).is_err());

        let selfref = vec![TaskSpec::new("a", "general").with_dependencies(vec![0])];
        assert!(validate_plan(&selfref).is_err());
    }

    #[test]
    fn validate_rejects_empty_plan_and_blank_prompt() {
        assert!(validate_plan(&[]).is_err());
        assert!(validate_plan(&[TaskSpec::new("   ", "general")]).is_err());
    }

    #[test]
    fn fallback_is_single_general_task() {
        let plan = fallback_plan("do the thing");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].agent_type, agent_type::GENERAL);
        assert_eq!(plan[0].prompt, "do the thing");
        assert!(plan[0].dependencies.is_empty());
    }

    #[test]
    fn materialize_resolves_index_deps_in_order() {
        let specs = vec![
            TaskSpec::new("fetch", agent_type::DATA_RETRIEVAL),
            TaskSpec::new("analyze", agent_type::CODE_EXECUTION)
                .with_dependencies(vec![0])
                .with_model("code-model"),
            TaskSpec::new("report", agent_type::REPORT).with_dependencies(vec![1]),
        ];
        let tasks = materialize("a1", &specs);
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id.clone()]);
        assert_eq!(tasks[1].model.as_deref(), Some("code-model"));
        assert_eq!(tasks[2].dependencies, vec![tasks[1].id.clone()]);
        // Dependencies are strictly older than their dependents.
        assert!(tasks[0].created_at < tasks[1].created_at);
        assert!(tasks[1].created_at < tasks[2].created_at);
    }

    #[tokio::test]
    async fn static_planner_queues_recoveries_and_records_requests() {
        let planner = StaticPlanner::new(vec![TaskSpec::new("only", "general")]).with_recovery(
            RecoveryPlan {
                reasoning: "try direct fetch".into(),
                tasks: vec![ReplacementSpec::new("fetch directly", agent_type::CODE_EXECUTION)],
            },
        );

        let request = RecoveryRequest {
            root_prompt: "goal".into(),
            failed_prompt: "fetch".into(),
            failed_agent_type: agent_type::DATA_RETRIEVAL.into(),
            error: "404".into(),
            upstream_summaries: vec![],
        };

        let first = planner.recover(request.clone()).await.unwrap();
        assert_eq!(first.tasks.len(), 1);

        // Queue exhausted: not recoverable.
        let second = planner.recover(request).await.unwrap();
        assert!(second.tasks.is_empty());

        assert_eq!(planner.recovery_requests().len(), 2);
    }
}
