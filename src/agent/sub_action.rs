//! Sub-action agent: expands a task into a child action with its own
//! planner-generated DAG and runs it inline.
//!
//! Depth is bounded; the guard fires before any child row is written, so a
//! rejected expansion leaves no orphan action behind. The supervisor's
//! single-active rule is per action id, so the recursive run cannot collide
//! with the parent's.

use std::sync::Weak;

use async_trait::async_trait;

use super::{AgentError, AgentOutcome, AgentRequest, AgentRunner, TaskLogger};
use crate::model::Action;
use crate::orchestrator::Orchestrator;
use crate::types::{truncate_chars, TaskStatus, MAX_SUB_ACTION_DEPTH};

pub struct SubActionAgent {
    orchestrator: Weak<Orchestrator>,
}

impl SubActionAgent {
    pub(crate) fn new(orchestrator: Weak<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl AgentRunner for SubActionAgent {
    async fn run(
        &self,
        request: AgentRequest,
        logger: &TaskLogger,
    ) -> Result<AgentOutcome, AgentError> {
        let orchestrator = self
            .orchestrator
            .upgrade()
            .ok_or_else(|| AgentError::Runtime("orchestrator has shut down".into()))?;
        let store = orchestrator.store();

        let parent_action = store
            .action(&request.action_id)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;

        if parent_action.depth >= MAX_SUB_ACTION_DEPTH {
            return Err(AgentError::DepthLimit {
                depth: parent_action.depth,
            });
        }

        // Combined prompt: upstream context blocks, then the task's own
        // prompt.
        let mut context_parts: Vec<String> = request
            .upstream
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(dep_id, text)| format!("[Context from upstream task {dep_id}]\n{text}"))
            .collect();
        context_parts.sort(); // upstream map order is not deterministic
        let combined_prompt = if context_parts.is_empty() {
            request.prompt.clone()
        } else {
            format!("{}\n\n{}", context_parts.join("\n\n"), request.prompt)
        };

        let child = Action::child_of(
            &parent_action,
            &request.task_id,
            format!("Sub: {}", truncate_chars(&request.prompt, 80)),
            combined_prompt.clone(),
            request.prompt.clone(),
        );
        let child_id = child.id.clone();

        store
            .insert_action(child)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;
        let tasks = orchestrator.plan_tasks(&combined_prompt, &child_id).await;
        store
            .insert_tasks(tasks)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;
        store
            .link_sub_action(&request.task_id, &child_id)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;

        logger
            .info(format!(
                "Spawned sub-action {child_id}: {}",
                truncate_chars(&request.prompt, 60)
            ))
            .await;

        // Run the child DAG to its terminal status.
        orchestrator
            .supervisor()
            .run(&child_id)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;

        logger
            .info(format!("Sub-action {child_id} finished"))
            .await;

        // Newest completed child task's summary becomes this task's output.
        let child_tasks = store
            .tasks_for_action(&child_id)
            .await
            .map_err(|e| AgentError::Runtime(e.to_string()))?;
        let summary = child_tasks
            .iter()
            .rev()
            .filter(|t| t.status == TaskStatus::Completed)
            .find_map(|t| t.output_summary.clone())
            .unwrap_or_else(|| "Sub-action completed (no output)".to_string());

        Ok(AgentOutcome {
            summary,
            sub_action_id: Some(child_id),
        })
    }
}
