//! DAG scheduler: discovers ready tasks and dispatches them in parallel.
//!
//! One pass loops until quiescence: no task is pending-and-ready, none is
//! running, and no new dependency failures were marked. The atomic flip to
//! `running` before dispatch is the sole guard against duplicate execution.
//! Agent failures are encoded as task status and never unwind out of the
//! worker join; store failures do, and terminate the run.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::agent::{AgentRegistry, AgentRequest, TaskLogger};
use crate::event_bus::{Event, EventBus};
use crate::model::{Artifact, Task, TaskOutput};
use crate::store::{Store, StoreError};
use crate::types::{TaskStatus, DEPENDENCY_FAILED, SCHEDULER_POLL_INTERVAL};

#[derive(Clone)]
pub(crate) struct Scheduler {
    store: Arc<dyn Store>,
    bus: EventBus,
    agents: AgentRegistry,
}

impl Scheduler {
    pub(crate) fn new(store: Arc<dyn Store>, bus: EventBus, agents: AgentRegistry) -> Self {
        Self { store, bus, agents }
    }

    /// Run DAG passes for one action until quiescence or cancellation.
    #[instrument(skip(self, cancel))]
    pub(crate) async fn run_to_quiescence(
        &self,
        action_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let snapshot = self.store.tasks_for_action(action_id).await?;
            let completed: FxHashSet<&str> = snapshot
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| t.id.as_str())
                .collect();
            let failed: FxHashSet<&str> = snapshot
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.id.as_str())
                .collect();
            let running = snapshot
                .iter()
                .filter(|t| t.status == TaskStatus::Running)
                .count();

            let mut ready: Vec<Task> = Vec::new();
            let mut marked_failed = false;
            for task in &snapshot {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                let deps_failed = task
                    .dependencies
                    .iter()
                    .any(|d| failed.contains(d.as_str()));
                if deps_failed {
                    self.store
                        .set_task_failed(&task.id, DEPENDENCY_FAILED)
                        .await?;
                    self.bus.publish(
                        action_id,
                        Event::TaskFailed {
                            task_id: task.id.clone(),
                            error: DEPENDENCY_FAILED.to_string(),
                        },
                    );
                    marked_failed = true;
                } else if task
                    .dependencies
                    .iter()
                    .all(|d| completed.contains(d.as_str()))
                {
                    ready.push(task.clone());
                }
            }

            if ready.is_empty() && running == 0 && !marked_failed {
                return Ok(());
            }

            let ready_ids: Vec<String> = ready.iter().map(|t| t.id.clone()).collect();
            self.store.mark_tasks_running(action_id, &ready_ids).await?;

            if ready.is_empty() {
                // Something is still running (or just failed); wait for
                // progress before the next pass.
                if marked_failed {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(SCHEDULER_POLL_INTERVAL) => {}
                }
                continue;
            }

            debug!(action_id, count = ready.len(), "dispatching ready tasks");
            let workers = ready
                .into_iter()
                .map(|task| self.run_task(action_id, task, cancel.clone()));
            for result in join_all(workers).await {
                result?;
            }
        }
    }

    /// Execute one task with its agent. Agent failures become task status;
    /// only store failures escape.
    async fn run_task(
        &self,
        action_id: &str,
        task: Task,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        self.bus.publish(
            action_id,
            Event::TaskStarted {
                task_id: task.id.clone(),
                action_id: action_id.to_string(),
            },
        );

        let logger = TaskLogger::new(
            Arc::clone(&self.store),
            self.bus.clone(),
            action_id,
            task.id.clone(),
        );

        let upstream = self.upstream_outputs(&task.dependencies).await?;

        let runner = match self.agents.get(&task.agent_type) {
            Ok(runner) => runner,
            Err(err) => {
                let message = err.to_string();
                warn!(task_id = %task.id, %message, "no runner for task");
                self.store.set_task_failed(&task.id, &message).await?;
                self.bus.publish(
                    action_id,
                    Event::TaskFailed {
                        task_id: task.id.clone(),
                        error: message,
                    },
                );
                return Ok(());
            }
        };

        let request = AgentRequest {
            task_id: task.id.clone(),
            action_id: action_id.to_string(),
            prompt: task.prompt.clone(),
            upstream,
            model: task.model.clone(),
            cancel: cancel.clone(),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task_id = %task.id, "cancelled, discarding in-flight result");
                return Ok(());
            }
            outcome = runner.run(request, &logger) => outcome,
        };

        match outcome {
            Ok(outcome) => {
                self.store
                    .set_task_completed(&task.id, &outcome.summary, outcome.sub_action_id.as_deref())
                    .await?;
                self.store
                    .upsert_output(TaskOutput::new(&task.id, &outcome.summary))
                    .await?;
                self.bus.publish(
                    action_id,
                    Event::TaskCompleted {
                        task_id: task.id.clone(),
                        output_summary: outcome.summary,
                    },
                );
            }
            Err(err) => {
                let message = err.to_string();
                warn!(task_id = %task.id, error = %message, "task failed");
                self.store.set_task_failed(&task.id, &message).await?;
                self.bus.publish(
                    action_id,
                    Event::TaskFailed {
                        task_id: task.id.clone(),
                        error: message,
                    },
                );
            }
        }
        Ok(())
    }

    /// Materialize upstream outputs: dependency id -> summary text with an
    /// artifact-reference block appended.
    async fn upstream_outputs(
        &self,
        dependencies: &[String],
    ) -> Result<HashMap<String, String>, StoreError> {
        let mut outputs = HashMap::new();
        for dep_id in dependencies {
            let Some(output) = self.store.output_for_task(dep_id).await? else {
                continue;
            };
            let mut text = output.text.unwrap_or_default();
            let artifacts = self.store.artifacts_for_task(dep_id).await?;
            if !artifacts.is_empty() {
                text.push_str("\n\n**Artifacts from this task:**\n");
                for artifact in &artifacts {
                    let reference = artifact_ref(artifact);
                    let is_image = artifact
                        .mime_type
                        .as_deref()
                        .is_some_and(|m| m.starts_with("image/"));
                    if is_image {
                        text.push_str(&format!("![{}]({})\n", artifact.kind, reference));
                    } else {
                        text.push_str(&format!(
                            "- [{}: {}]({})\n",
                            artifact.kind,
                            artifact.mime_type.as_deref().unwrap_or("unknown"),
                            reference
                        ));
                    }
                }
            }
            outputs.insert(dep_id.clone(), text);
        }
        Ok(outputs)
    }
}

fn artifact_ref(artifact: &Artifact) -> String {
    artifact
        .storage_path
        .clone()
        .unwrap_or_else(|| format!("artifact://{}", artifact.id))
}
