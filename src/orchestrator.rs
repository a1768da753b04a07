//! Orchestrator facade: wires the store, planner, agents, event bus, and
//! supervisor together and exposes the action lifecycle as library calls.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::sub_action::SubActionAgent;
use crate::agent::AgentRegistry;
use crate::dag;
use crate::error::CoreError;
use crate::event_bus::EventBus;
use crate::invalidate::{invalidate_downstream, Invalidation};
use crate::model::{Action, LogEntry, Task};
use crate::observe::Observer;
use crate::planner::{fallback_plan, materialize, validate_plan, Planner};
use crate::store::Store;
use crate::supervisor::Supervisor;
use crate::types::agent_type;

/// Partial update applied to a task by a live edit. `None` fields are left
/// unchanged. Any edit invalidates the task and everything downstream.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub prompt: Option<String>,
    pub agent_type: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub model: Option<String>,
}

/// Entry point owning one orchestration runtime.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    bus: EventBus,
    planner: Arc<dyn Planner>,
    agents: AgentRegistry,
    supervisor: Supervisor,
}

impl Orchestrator {
    /// Wire up a runtime over the given store and planner. The sub-action
    /// runner is registered automatically; register the rest of your agent
    /// types on [`Orchestrator::agents`] before running actions.
    pub fn new(store: Arc<dyn Store>, planner: Arc<dyn Planner>) -> Arc<Self> {
        let bus = EventBus::new();
        let agents = AgentRegistry::new();
        Arc::new_cyclic(|weak| {
            agents.register(
                agent_type::SUB_ACTION,
                Arc::new(SubActionAgent::new(weak.clone())),
            );
            let supervisor = Supervisor::new(
                Arc::clone(&store),
                bus.clone(),
                Arc::clone(&planner),
                agents.clone(),
            );
            Self {
                store,
                bus,
                planner,
                agents: agents.clone(),
                supervisor,
            }
        })
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Create a draft action and plan its DAG. Planner failures fall back
    /// to a single `general` task echoing the root prompt.
    pub async fn create_action(
        &self,
        title: impl Into<String>,
        root_prompt: impl Into<String>,
    ) -> Result<Action, CoreError> {
        let action = Action::new(title, root_prompt);
        self.store.insert_action(action.clone()).await?;
        let tasks = self.plan_tasks(&action.root_prompt, &action.id).await;
        info!(action_id = %action.id, tasks = tasks.len(), "action created");
        self.store.insert_tasks(tasks).await?;
        Ok(action)
    }

    /// Plan and materialize tasks for an action, falling back to the
    /// single-task plan when the planner fails or returns an invalid DAG.
    pub(crate) async fn plan_tasks(&self, root_prompt: &str, action_id: &str) -> Vec<Task> {
        let specs = match self.planner.plan(root_prompt).await {
            Ok(specs) => specs,
            Err(err) => {
                warn!(action_id, %err, "planner failed, falling back to single task");
                fallback_plan(root_prompt)
            }
        };
        let specs = match validate_plan(&specs) {
            Ok(()) => specs,
            Err(err) => {
                warn!(action_id, %err, "planner output rejected, falling back to single task");
                fallback_plan(root_prompt)
            }
        };
        materialize(action_id, &specs)
    }

    /// Run an action to a terminal status. Cancels and replaces any prior
    /// run of the same action id.
    pub async fn run_action(&self, action_id: &str) -> Result<(), CoreError> {
        self.supervisor.run(action_id).await
    }

    /// Request cancellation of a running action; the run resets it to
    /// draft. Returns whether a run was active.
    pub fn cancel_action(&self, action_id: &str) -> bool {
        self.supervisor.cancel(action_id)
    }

    pub fn is_running(&self, action_id: &str) -> bool {
        self.supervisor.is_running(action_id)
    }

    // ── live edits ──────────────────────────────────────────────────────

    /// Apply a live edit to a task, then invalidate it and its downstream
    /// closure. Child actions of invalidated tasks are cascade-deleted.
    /// Returns the invalidated task ids.
    pub async fn edit_task(
        &self,
        task_id: &str,
        edit: TaskEdit,
    ) -> Result<Vec<String>, CoreError> {
        let mut task = self.store.task(task_id).await?;

        if let Some(deps) = &edit.dependencies {
            let siblings = self.store.tasks_for_action(&task.action_id).await?;
            for dep in deps {
                if dep == task_id {
                    return Err(CoreError::InvalidEdit(format!(
                        "task {task_id} cannot depend on itself"
                    )));
                }
                if !siblings.iter().any(|t| &t.id == dep) {
                    return Err(CoreError::InvalidEdit(format!(
                        "dependency {dep} is not a task of the same action"
                    )));
                }
            }
            if dag::creates_cycle(&siblings, task_id, deps) {
                return Err(CoreError::InvalidEdit(format!(
                    "dependencies of task {task_id} would close a cycle"
                )));
            }
        }

        if let Some(prompt) = edit.prompt {
            task.prompt = prompt;
        }
        if let Some(agent_type) = edit.agent_type {
            task.agent_type = agent_type;
        }
        if let Some(dependencies) = edit.dependencies {
            task.dependencies = dependencies;
        }
        if let Some(model) = edit.model {
            task.model = Some(model);
        }
        let action_id = task.action_id.clone();
        self.store.update_task(task).await?;

        let Invalidation {
            task_ids,
            detached_sub_actions,
        } = invalidate_downstream(self.store.as_ref(), &action_id, task_id).await?;

        for child_id in detached_sub_actions {
            if let Err(err) = self.delete_action(&child_id).await {
                warn!(%child_id, %err, "failed to cascade-delete detached sub-action");
            }
        }

        info!(task_id, invalidated = task_ids.len(), "task edited");
        Ok(task_ids)
    }

    // ── deletion ────────────────────────────────────────────────────────

    /// Delete an action, its rows, and every descendant action spawned by
    /// its sub-action tasks. A running execution is cancelled first.
    pub async fn delete_action(&self, action_id: &str) -> Result<(), CoreError> {
        self.cancel_action(action_id);

        // Walk the descendant tree breadth-first, then delete every node.
        let mut to_delete = vec![action_id.to_string()];
        let mut queue: VecDeque<String> = VecDeque::from([action_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for child in self.store.child_actions(&current).await? {
                self.cancel_action(&child.id);
                to_delete.push(child.id.clone());
                queue.push_back(child.id);
            }
        }
        for id in to_delete.iter().rev() {
            self.store.delete_action(id).await?;
        }
        info!(action_id, deleted = to_delete.len(), "action deleted");
        Ok(())
    }

    // ── reads ───────────────────────────────────────────────────────────

    pub async fn action(&self, action_id: &str) -> Result<Action, CoreError> {
        Ok(self.store.action(action_id).await?)
    }

    pub async fn tasks(&self, action_id: &str) -> Result<Vec<Task>, CoreError> {
        Ok(self.store.tasks_for_action(action_id).await?)
    }

    pub async fn logs(&self, task_id: &str) -> Result<Vec<LogEntry>, CoreError> {
        Ok(self.store.logs_for_task(task_id).await?)
    }

    /// Subscribe to an action's events: a snapshot first, then the live
    /// tail with keepalive pings.
    pub async fn observe(&self, action_id: &str) -> Result<Observer, CoreError> {
        Ok(Observer::new(&self.store, &self.bus, action_id).await?)
    }
}
