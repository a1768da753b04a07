//! Action supervisor: the cancellable task that owns one action's
//! execution.
//!
//! One supervisor runs per action id at a time. Starting a new run cancels
//! any prior run of the same id and waits for it to observe cancellation
//! before proceeding. Cancellation is cooperative: observed at every
//! suspension point, it resets still-running tasks, puts the action back
//! in draft, and exits cleanly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::agent::AgentRegistry;
use crate::error::CoreError;
use crate::event_bus::{Event, EventBus};
use crate::planner::Planner;
use crate::recovery::RecoveryCoordinator;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::types::{ActionStatus, TaskStatus, MAX_RECOVERY_ATTEMPTS};

// ============================================================================
// RUNNING-SUPERVISOR REGISTRY
// ============================================================================

#[derive(Clone)]
struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

/// Process-local table of running supervisors, one entry per action id.
#[derive(Clone, Default)]
struct Registry {
    runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
    next_run_id: Arc<AtomicU64>,
}

/// Guard owning one registry entry. Removes itself and signals completion
/// on drop — the finally-path of a supervisor run.
struct RunSlot {
    registry: Registry,
    action_id: String,
    run_id: u64,
    cancel: CancellationToken,
    finished_tx: watch::Sender<bool>,
}

impl Registry {
    /// Cancel and wait out any prior run for `action_id`, then register a
    /// new one. When two callers race, the later registration wins and the
    /// earlier run gets cancelled.
    async fn begin(&self, action_id: &str) -> RunSlot {
        loop {
            let prior = {
                let mut runs = self.runs.lock();
                match runs.get(action_id) {
                    Some(run) => run.clone(),
                    None => {
                        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
                        let cancel = CancellationToken::new();
                        let (finished_tx, finished_rx) = watch::channel(false);
                        runs.insert(
                            action_id.to_string(),
                            ActiveRun {
                                run_id,
                                cancel: cancel.clone(),
                                finished: finished_rx,
                            },
                        );
                        return RunSlot {
                            registry: self.clone(),
                            action_id: action_id.to_string(),
                            run_id,
                            cancel,
                            finished_tx,
                        };
                    }
                }
            };

            prior.cancel.cancel();
            let mut finished = prior.finished;
            // Either the run signals completion or its sender is dropped.
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    fn cancel(&self, action_id: &str) -> bool {
        match self.runs.lock().get(action_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn is_running(&self, action_id: &str) -> bool {
        self.runs.lock().contains_key(action_id)
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        {
            let mut runs = self.registry.runs.lock();
            // Only remove our own entry; a successor may have replaced it.
            if runs
                .get(&self.action_id)
                .is_some_and(|run| run.run_id == self.run_id)
            {
                runs.remove(&self.action_id);
            }
        }
        let _ = self.finished_tx.send(true);
    }
}

// ============================================================================
// SUPERVISOR
// ============================================================================

/// Runs one action's DAG to a terminal status, recovering failed tasks
/// within the retry budget.
pub struct Supervisor {
    store: Arc<dyn Store>,
    bus: EventBus,
    scheduler: Scheduler,
    recovery: RecoveryCoordinator,
    registry: Registry,
}

impl Supervisor {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        bus: EventBus,
        planner: Arc<dyn Planner>,
        agents: AgentRegistry,
    ) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&store), bus.clone(), agents);
        let recovery = RecoveryCoordinator::new(Arc::clone(&store), bus.clone(), planner);
        Self {
            store,
            bus,
            scheduler,
            recovery,
            registry: Registry::default(),
        }
    }

    /// Execute `action_id` until it is completed, failed, or cancelled
    /// back to draft. Replaces any prior run of the same action.
    #[instrument(skip(self))]
    pub async fn run(&self, action_id: &str) -> Result<(), CoreError> {
        // Fail fast on unknown ids before touching the registry.
        self.store.action(action_id).await?;

        let slot = self.registry.begin(action_id).await;
        let cancel = slot.cancel.clone();
        let result = self.run_inner(action_id, &cancel).await;
        drop(slot);

        if let Err(ref err) = result {
            warn!(action_id, %err, "supervisor run aborted");
        }
        result
    }

    /// Request cancellation of a running action. Returns whether a run was
    /// there to cancel; the run itself resets the action to draft.
    pub fn cancel(&self, action_id: &str) -> bool {
        self.registry.cancel(action_id)
    }

    pub fn is_running(&self, action_id: &str) -> bool {
        self.registry.is_running(action_id)
    }

    async fn run_inner(
        &self,
        action_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        self.store
            .set_action_status(action_id, ActionStatus::Running)
            .await?;
        self.bus.publish(
            action_id,
            Event::ActionStarted {
                action_id: action_id.to_string(),
            },
        );

        loop {
            self.scheduler.run_to_quiescence(action_id, cancel).await?;
            if cancel.is_cancelled() {
                return self.settle_cancelled(action_id).await;
            }

            let tasks = self.store.tasks_for_action(action_id).await?;
            let action = self.store.action(action_id).await?;

            let all_completed = tasks.iter().all(|t| t.status == TaskStatus::Completed);
            let any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);

            if all_completed {
                self.store
                    .set_action_status(action_id, ActionStatus::Completed)
                    .await?;
                self.bus.publish(
                    action_id,
                    Event::ActionCompleted {
                        action_id: action_id.to_string(),
                    },
                );
                info!(action_id, "action completed");
                return Ok(());
            }

            if !any_failed {
                // Quiescent with pending tasks that can never become
                // ready; nothing to recover.
                return self
                    .settle_failed(action_id, "No runnable tasks remain")
                    .await;
            }

            if action.retry_count >= MAX_RECOVERY_ATTEMPTS {
                return self
                    .settle_failed(
                        action_id,
                        "One or more tasks failed after all recovery attempts",
                    )
                    .await;
            }

            let attempt = action.retry_count + 1;
            info!(
                action_id,
                attempt,
                max_attempts = MAX_RECOVERY_ATTEMPTS,
                "attempting recovery"
            );
            let recovered = self.recovery.attempt(action_id).await?;
            if cancel.is_cancelled() {
                return self.settle_cancelled(action_id).await;
            }
            if !recovered {
                return self
                    .settle_failed(action_id, "Recovery planning produced no replacement tasks")
                    .await;
            }

            self.store.bump_retry_count(action_id).await?;
            self.bus.publish(
                action_id,
                Event::ActionRetrying {
                    action_id: action_id.to_string(),
                    attempt,
                    max_attempts: MAX_RECOVERY_ATTEMPTS,
                },
            );
        }
    }

    async fn settle_failed(&self, action_id: &str, reason: &str) -> Result<(), CoreError> {
        self.store
            .set_action_status(action_id, ActionStatus::Failed)
            .await?;
        self.bus.publish(
            action_id,
            Event::ActionFailed {
                action_id: action_id.to_string(),
                reason: reason.to_string(),
            },
        );
        info!(action_id, reason, "action failed");
        Ok(())
    }

    /// Cancellation is not an error: discard in-flight work, leave no task
    /// in `running`, and put the action back in draft.
    async fn settle_cancelled(&self, action_id: &str) -> Result<(), CoreError> {
        if let Ok(tasks) = self.store.tasks_for_action(action_id).await {
            let running: Vec<String> = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Running)
                .map(|t| t.id.clone())
                .collect();
            if !running.is_empty() {
                if let Err(err) = self.store.reset_tasks(action_id, &running).await {
                    warn!(action_id, %err, "failed to reset running tasks after cancel");
                }
            }
        }
        if let Err(err) = self
            .store
            .set_action_status(action_id, ActionStatus::Draft)
            .await
        {
            warn!(action_id, %err, "failed to reset action to draft after cancel");
        }
        info!(action_id, "action cancelled, reset to draft");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::model::{Action, Task};
    use crate::planner::{RecoveryPlan, ReplacementSpec, StaticPlanner, TaskSpec};
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: EventBus,
        planner: Arc<StaticPlanner>,
        agents: AgentRegistry,
    }

    impl Fixture {
        fn new(agent: MockAgent) -> Self {
            let agents = AgentRegistry::new();
            agents.register("general", Arc::new(agent));
            Self {
                store: Arc::new(MemoryStore::new()),
                bus: EventBus::new(),
                planner: Arc::new(StaticPlanner::new(vec![TaskSpec::new("x", "general")])),
                agents,
            }
        }

        fn supervisor(&self) -> Supervisor {
            Supervisor::new(
                Arc::clone(&self.store) as Arc<dyn Store>,
                self.bus.clone(),
                Arc::clone(&self.planner) as Arc<dyn Planner>,
                self.agents.clone(),
            )
        }

        async fn seed_chain(&self, n: usize) -> Action {
            let action = Action::new("test", "root");
            self.store.insert_action(action.clone()).await.unwrap();
            let mut tasks: Vec<Task> = Vec::new();
            for i in 0..n {
                let deps = tasks
                    .last()
                    .map(|t: &Task| vec![t.id.clone()])
                    .unwrap_or_default();
                let mut task = Task::new(&action.id, format!("step {i}"), "general")
                    .with_dependencies(deps);
                task.created_at += chrono::Duration::microseconds(i as i64);
                tasks.push(task);
            }
            self.store.insert_tasks(tasks).await.unwrap();
            action
        }
    }

    #[tokio::test]
    async fn completes_a_healthy_action() {
        let fx = Fixture::new(MockAgent::new());
        let action = fx.seed_chain(2).await;

        fx.supervisor().run(&action.id).await.unwrap();

        let row = fx.store.action(&action.id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Completed);
        assert_eq!(row.retry_count, 0);
        assert!(!fx.supervisor().is_running(&action.id));
    }

    #[tokio::test]
    async fn exhausts_retry_budget_then_fails() {
        let fx = Fixture::new(MockAgent::new().fail_matching("step 0", "boom"));
        // Recovery always proposes the same failing prompt.
        for _ in 0..MAX_RECOVERY_ATTEMPTS {
            fx.planner.queue_recovery(RecoveryPlan {
                reasoning: "same again".into(),
                tasks: vec![ReplacementSpec::new("step 0 retry... step 0", "general")],
            });
        }
        let action = fx.seed_chain(1).await;
        let mut sub = fx.bus.subscribe(&action.id);

        fx.supervisor().run(&action.id).await.unwrap();

        let row = fx.store.action(&action.id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Failed);
        assert_eq!(row.retry_count, MAX_RECOVERY_ATTEMPTS);

        // Retrying events carried attempt numbers 1 and 2; the terminal
        // event came last.
        let mut retry_attempts = Vec::new();
        let mut last = None;
        while let Some(event) = sub.try_recv() {
            if let Event::ActionRetrying { attempt, .. } = &event {
                retry_attempts.push(*attempt);
            }
            last = Some(event);
        }
        assert_eq!(retry_attempts, vec![1, 2]);
        assert!(matches!(last, Some(Event::ActionFailed { .. })));
    }

    #[tokio::test]
    async fn unrecoverable_failure_settles_failed() {
        let fx = Fixture::new(MockAgent::new().fail_matching("step 0", "boom"));
        let action = fx.seed_chain(2).await;

        fx.supervisor().run(&action.id).await.unwrap();

        let row = fx.store.action(&action.id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Failed);
        // Budget untouched: recovery never produced a plan.
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let fx = Fixture::new(MockAgent::new());
        assert!(matches!(
            fx.supervisor().run("missing").await,
            Err(CoreError::Store(_))
        ));
    }

    #[tokio::test]
    async fn cancel_resets_to_draft_with_no_running_tasks() {
        let fx = Fixture::new(MockAgent::new().with_delay(Duration::from_millis(200)));
        let action = fx.seed_chain(2).await;
        let supervisor = Arc::new(fx.supervisor());

        let runner = Arc::clone(&supervisor);
        let id = action.id.clone();
        let handle = tokio::spawn(async move { runner.run(&id).await });

        // Let the first worker get in flight, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.cancel(&action.id));
        handle.await.unwrap().unwrap();

        let row = fx.store.action(&action.id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Draft);
        let tasks = fx.store.tasks_for_action(&action.id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status != TaskStatus::Running));
        assert!(!supervisor.is_running(&action.id));
    }

    #[tokio::test]
    async fn second_run_cancels_the_first() {
        let fx = Fixture::new(MockAgent::new().with_delay(Duration::from_millis(300)));
        let action = fx.seed_chain(1).await;
        let supervisor = Arc::new(fx.supervisor());

        let first = {
            let supervisor = Arc::clone(&supervisor);
            let id = action.id.clone();
            tokio::spawn(async move { supervisor.run(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The replacement run waits the first out, then completes.
        supervisor.run(&action.id).await.unwrap();
        first.await.unwrap().unwrap();

        let row = fx.store.action(&action.id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Completed);
        assert!(!supervisor.is_running(&action.id));
    }

    #[tokio::test]
    async fn cancel_without_run_is_a_noop() {
        let fx = Fixture::new(MockAgent::new());
        let supervisor = fx.supervisor();
        assert!(!supervisor.cancel("nothing-running"));
    }
}
