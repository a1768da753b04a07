//! Recovery coordinator: turns root-cause failures into replacement
//! sub-plans and patches the DAG in place.
//!
//! A root cause is a failed task whose error is anything other than the
//! dependency-failure sentinel; transitively-failed tasks are reset once
//! their root cause has been repaired. Completed tasks are never touched.

use std::sync::Arc;

use chrono::Duration;
use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};

use crate::dag;
use crate::event_bus::{Event, EventBus};
use crate::model::Task;
use crate::planner::{Planner, RecoveryRequest, MAX_REPLACEMENT_TASKS};
use crate::store::{Store, StoreError};
use crate::types::{truncate_chars, TaskStatus, DEPENDENCY_FAILED};

/// Upstream context handed to the recovery planner is capped per summary.
const UPSTREAM_CONTEXT_CHARS: usize = 400;

#[derive(Clone)]
pub(crate) struct RecoveryCoordinator {
    store: Arc<dyn Store>,
    bus: EventBus,
    planner: Arc<dyn Planner>,
}

impl RecoveryCoordinator {
    pub(crate) fn new(store: Arc<dyn Store>, bus: EventBus, planner: Arc<dyn Planner>) -> Self {
        Self { store, bus, planner }
    }

    /// Attempt one recovery pass. Returns whether any root-cause task got
    /// a replacement plan; `false` tells the supervisor to fail the action.
    #[instrument(skip(self))]
    pub(crate) async fn attempt(&self, action_id: &str) -> Result<bool, StoreError> {
        let action = self.store.action(action_id).await?;
        let all_tasks = self.store.tasks_for_action(action_id).await?;
        let task_map: FxHashMap<&str, &Task> =
            all_tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let dependents = dag::dependents_index(&all_tasks);

        let mut recovered_any = false;

        for failed_task in all_tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            let error = failed_task
                .output_summary
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());

            // Transitive failures are repaired by resetting, not replanning.
            if error == DEPENDENCY_FAILED {
                continue;
            }

            let upstream_summaries: Vec<String> = failed_task
                .dependencies
                .iter()
                .filter_map(|dep_id| task_map.get(dep_id.as_str()))
                .filter(|dep| dep.status == TaskStatus::Completed)
                .filter_map(|dep| dep.output_summary.as_deref())
                .map(|s| truncate_chars(s, UPSTREAM_CONTEXT_CHARS).to_string())
                .collect();

            let request = RecoveryRequest {
                root_prompt: action.root_prompt.clone(),
                failed_prompt: failed_task.prompt.clone(),
                failed_agent_type: failed_task.agent_type.clone(),
                error: error.clone(),
                upstream_summaries,
            };

            let plan = match self.planner.recover(request).await {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(task_id = %failed_task.id, %err, "recovery planner call failed");
                    continue;
                }
            };

            let mut specs = plan.tasks;
            if specs.is_empty() {
                warn!(
                    task_id = %failed_task.id,
                    agent_type = %failed_task.agent_type,
                    "no replacement returned"
                );
                continue;
            }
            specs.truncate(MAX_REPLACEMENT_TASKS);

            let replacement_agent_types: Vec<String> =
                specs.iter().map(|s| s.agent_type.clone()).collect();

            if let [spec] = specs.as_slice() {
                // Single replacement: update the failed task in place.
                let mut row = self.store.task(&failed_task.id).await?;
                row.status = TaskStatus::Pending;
                row.output_summary = None;
                row.prompt = spec.prompt.clone();
                row.agent_type = spec.agent_type.clone();
                row.model = spec.model.clone();
                self.store.update_task(row).await?;
            } else {
                // Multiple replacements: chain-insert, rewire dependents to
                // the last new task, delete the original.
                let mut new_tasks: Vec<Task> = Vec::with_capacity(specs.len());
                for (i, spec) in specs.iter().enumerate() {
                    let deps = if i == 0 {
                        failed_task.dependencies.clone()
                    } else {
                        vec![new_tasks[i - 1].id.clone()]
                    };
                    let mut task = Task::new(action_id, &spec.prompt, &spec.agent_type)
                        .with_dependencies(deps);
                    task.model = spec.model.clone();
                    task.created_at += Duration::microseconds(i as i64);
                    task.updated_at = task.created_at;
                    new_tasks.push(task);
                }
                let Some(last_new) = new_tasks.last() else {
                    continue;
                };
                let last_new_id = last_new.id.clone();
                self.store.insert_tasks(new_tasks).await?;

                for dependent_id in dependents
                    .get(failed_task.id.as_str())
                    .into_iter()
                    .flatten()
                {
                    let Ok(mut row) = self.store.task(dependent_id).await else {
                        continue;
                    };
                    for dep in row.dependencies.iter_mut() {
                        if *dep == failed_task.id {
                            *dep = last_new_id.clone();
                        }
                    }
                    if row.output_summary.as_deref() == Some(DEPENDENCY_FAILED) {
                        row.status = TaskStatus::Pending;
                        row.output_summary = None;
                    }
                    self.store.update_task(row).await?;
                }

                self.store.delete_task(&failed_task.id).await?;
            }

            recovered_any = true;
            self.bus.publish(
                action_id,
                Event::TaskRecovered {
                    action_id: action_id.to_string(),
                    original_task_id: failed_task.id.clone(),
                    original_agent_type: failed_task.agent_type.clone(),
                    replacement_agent_types: replacement_agent_types.clone(),
                },
            );
            info!(
                task_id = %failed_task.id,
                from = %failed_task.agent_type,
                to = ?replacement_agent_types,
                "task recovered"
            );
        }

        // Reset any remaining dependency-failed task now that root causes
        // have been repaired; they re-fail on the next pass if one wasn't.
        let stale: Vec<String> = self
            .store
            .tasks_for_action(action_id)
            .await?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Failed
                    && t.output_summary.as_deref() == Some(DEPENDENCY_FAILED)
            })
            .map(|t| t.id)
            .collect();
        if !stale.is_empty() {
            self.store.reset_tasks(action_id, &stale).await?;
        }

        Ok(recovered_any)
    }
}
