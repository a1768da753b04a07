//! Live-edit invalidation: reverse-BFS reset of an edited task and
//! everything downstream of it.
//!
//! Runs as a single atomic store update per action. Outputs of invalidated
//! tasks are deleted; artifacts stay in place and are overwritten on the
//! next run.

use crate::dag;
use crate::model::Task;
use crate::store::{Store, StoreError};

/// What an invalidation touched.
#[derive(Debug, Clone, Default)]
pub struct Invalidation {
    /// Every task reset to pending (the edited task plus its
    /// reverse-transitive dependents).
    pub task_ids: Vec<String>,
    /// Child actions whose parent task was invalidated. The orchestrator
    /// cascade-deletes these.
    pub detached_sub_actions: Vec<String>,
}

/// Reset `task_id` and its downstream closure to pending, clearing outputs.
pub async fn invalidate_downstream(
    store: &dyn Store,
    action_id: &str,
    task_id: &str,
) -> Result<Invalidation, StoreError> {
    let tasks = store.tasks_for_action(action_id).await?;
    if !tasks.iter().any(|t| t.id == task_id) {
        return Err(StoreError::TaskNotFound(task_id.to_string()));
    }

    let mut task_ids: Vec<String> = dag::downstream_of(&tasks, task_id).into_iter().collect();
    task_ids.sort();
    task_ids.push(task_id.to_string());

    let detached_sub_actions = tasks
        .iter()
        .filter(|t| task_ids.contains(&t.id))
        .filter_map(|t: &Task| t.sub_action_id.clone())
        .collect();

    store.reset_tasks(action_id, &task_ids).await?;

    Ok(Invalidation {
        task_ids,
        detached_sub_actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, TaskOutput};
    use crate::store::MemoryStore;
    use crate::types::TaskStatus;

    /// Diamond: a -> {b, c} -> d, plus unrelated e.
    async fn seed() -> (MemoryStore, Action, Vec<Task>) {
        let store = MemoryStore::new();
        let action = Action::new("test", "root");
        store.insert_action(action.clone()).await.unwrap();

        let a = Task::new(&action.id, "a", "general");
        let b = Task::new(&action.id, "b", "general").with_dependencies(vec![a.id.clone()]);
        let c = Task::new(&action.id, "c", "general").with_dependencies(vec![a.id.clone()]);
        let d = Task::new(&action.id, "d", "general")
            .with_dependencies(vec![b.id.clone(), c.id.clone()]);
        let e = Task::new(&action.id, "e", "general");
        let tasks = vec![a, b, c, d, e];
        store.insert_tasks(tasks.clone()).await.unwrap();

        // Everything completed with outputs.
        for task in &tasks {
            store
                .set_task_completed(&task.id, "done", None)
                .await
                .unwrap();
            store
                .upsert_output(TaskOutput::new(&task.id, "done"))
                .await
                .unwrap();
        }
        (store, action, tasks)
    }

    #[tokio::test]
    async fn resets_exactly_the_reverse_closure() {
        let (store, action, tasks) = seed().await;
        let (b, e) = (&tasks[1], &tasks[4]);

        let invalidation = invalidate_downstream(&store, &action.id, &b.id)
            .await
            .unwrap();

        // b and d reset; a, c, e untouched.
        assert_eq!(invalidation.task_ids.len(), 2);
        assert!(invalidation.task_ids.contains(&b.id));
        assert!(invalidation.task_ids.contains(&tasks[3].id));

        let snapshot = store.tasks_for_action(&action.id).await.unwrap();
        for task in &snapshot {
            let invalidated = invalidation.task_ids.contains(&task.id);
            if invalidated {
                assert_eq!(task.status, TaskStatus::Pending);
                assert!(task.output_summary.is_none());
                assert!(store.output_for_task(&task.id).await.unwrap().is_none());
            } else {
                assert_eq!(task.status, TaskStatus::Completed);
                assert_eq!(task.output_summary.as_deref(), Some("done"));
                assert!(store.output_for_task(&task.id).await.unwrap().is_some());
            }
        }
        assert_eq!(
            store.task(&e.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn root_edit_invalidates_whole_branch() {
        let (store, action, tasks) = seed().await;
        let invalidation = invalidate_downstream(&store, &action.id, &tasks[0].id)
            .await
            .unwrap();
        // a, b, c, d — but never the unrelated e.
        assert_eq!(invalidation.task_ids.len(), 4);
        assert!(!invalidation.task_ids.contains(&tasks[4].id));
    }

    #[tokio::test]
    async fn reports_detached_sub_actions() {
        let (store, action, tasks) = seed().await;
        store
            .link_sub_action(&tasks[3].id, "child-action-1")
            .await
            .unwrap();

        let invalidation = invalidate_downstream(&store, &action.id, &tasks[1].id)
            .await
            .unwrap();

        assert_eq!(invalidation.detached_sub_actions, vec!["child-action-1"]);
        // The link itself is cleared by the reset.
        assert!(store
            .task(&tasks[3].id)
            .await
            .unwrap()
            .sub_action_id
            .is_none());
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let (store, action, _) = seed().await;
        assert!(matches!(
            invalidate_downstream(&store, &action.id, "missing").await,
            Err(StoreError::TaskNotFound(_))
        ));
    }
}
