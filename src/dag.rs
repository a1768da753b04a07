//! Dependency-graph helpers shared by the scheduler, the invalidation
//! engine, and the recovery coordinator.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::model::Task;

/// Build the reverse dependency index: task id -> ids of tasks depending
/// on it.
pub fn dependents_index(tasks: &[Task]) -> FxHashMap<&str, Vec<&str>> {
    let mut index: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for task in tasks {
        for dep in &task.dependencies {
            index.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }
    index
}

/// Reverse-transitive closure of the dependents of `task_id` (BFS; the
/// task itself is not included).
pub fn downstream_of(tasks: &[Task], task_id: &str) -> FxHashSet<String> {
    let index = dependents_index(tasks);
    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<&str> = index
        .get(task_id)
        .map(|deps| deps.iter().copied().collect())
        .unwrap_or_default();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.to_string()) {
            continue;
        }
        if let Some(next) = index.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    visited
}

/// Check whether pointing `task_id` at `new_deps` would close a cycle,
/// i.e. whether `task_id` is reachable from any of the new dependencies by
/// following dependency edges.
pub fn creates_cycle(tasks: &[Task], task_id: &str, new_deps: &[String]) -> bool {
    let by_id: FxHashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut queue: VecDeque<&str> = new_deps.iter().map(String::as_str).collect();

    while let Some(current) = queue.pop_front() {
        if current == task_id {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(task) = by_id.get(current) {
            queue.extend(task.dependencies.iter().map(String::as_str));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        let mut t = Task::new("a1", format!("prompt {id}"), "general")
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect());
        t.id = id.to_string();
        t
    }

    #[test]
    fn downstream_of_linear_chain() {
        let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])];
        let closure = downstream_of(&tasks, "t1");
        assert_eq!(closure.len(), 2);
        assert!(closure.contains("t2"));
        assert!(closure.contains("t3"));
    }

    #[test]
    fn downstream_of_diamond() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let closure = downstream_of(&tasks, "b");
        assert_eq!(closure.len(), 1);
        assert!(closure.contains("d"));

        let from_root = downstream_of(&tasks, "a");
        assert_eq!(from_root.len(), 3);
    }

    #[test]
    fn downstream_of_leaf_is_empty() {
        let tasks = vec![task("t1", &[]), task("t2", &["t1"])];
        assert!(downstream_of(&tasks, "t2").is_empty());
    }

    #[test]
    fn cycle_detection() {
        let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])];
        // t1 <- t3 would close t1 -> t2 -> t3 -> t1.
        assert!(creates_cycle(&tasks, "t1", &["t3".to_string()]));
        // Re-pointing t3 at t1 keeps the graph acyclic.
        assert!(!creates_cycle(&tasks, "t3", &["t1".to_string()]));
        // Self reference is a cycle.
        assert!(creates_cycle(&tasks, "t2", &["t2".to_string()]));
    }
}
