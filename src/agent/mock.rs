//! Mock agent for testing.
//!
//! Returns configurable outcomes without doing real work. Essential for
//! unit tests and CI pipelines: scripted failures drive the recovery path,
//! recorded invocations let tests assert exactly what re-ran.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentError, AgentOutcome, AgentRequest, AgentRunner, TaskLogger};

struct FailureRule {
    /// Substring matched against the task prompt.
    matcher: String,
    error: String,
    /// `true` removes the rule after its first hit.
    once: bool,
}

/// Agent runner with scripted behavior.
pub struct MockAgent {
    summaries: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<FailureRule>>,
    /// Prompts of every invocation, in arrival order.
    invocations: Arc<Mutex<Vec<AgentRequest>>>,
    delay: Option<Duration>,
}

impl MockAgent {
    /// Create a mock that completes every task, echoing its prompt.
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            invocations: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleep this long before answering (lets tests overlap workers).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer prompts containing `matcher` with `summary` instead of the
    /// default echo.
    pub fn summary_for(self, matcher: impl Into<String>, summary: impl Into<String>) -> Self {
        self.summaries
            .lock()
            .unwrap()
            .push((matcher.into(), summary.into()));
        self
    }

    /// Fail every prompt containing `matcher`.
    pub fn fail_matching(self, matcher: impl Into<String>, error: impl Into<String>) -> Self {
        self.failures.lock().unwrap().push(FailureRule {
            matcher: matcher.into(),
            error: error.into(),
            once: false,
        });
        self
    }

    /// Fail the first prompt containing `matcher`, then behave normally.
    pub fn fail_once_matching(self, matcher: impl Into<String>, error: impl Into<String>) -> Self {
        self.failures.lock().unwrap().push(FailureRule {
            matcher: matcher.into(),
            error: error.into(),
            once: true,
        });
        self
    }

    /// Every request this agent has served (for assertions).
    pub fn invocations(&self) -> Vec<AgentRequest> {
        self.invocations.lock().unwrap().clone()
    }

    /// Prompts of every request, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRunner for MockAgent {
    async fn run(
        &self,
        request: AgentRequest,
        _logger: &TaskLogger,
    ) -> Result<AgentOutcome, AgentError> {
        self.invocations.lock().unwrap().push(request.clone());

        let scripted_failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures
                .iter()
                .position(|rule| request.prompt.contains(&rule.matcher))
            {
                Some(idx) => {
                    let error = failures[idx].error.clone();
                    if failures[idx].once {
                        failures.remove(idx);
                    }
                    Some(error)
                }
                None => None,
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = scripted_failure {
            return Err(AgentError::Runtime(error));
        }

        let summary = self
            .summaries
            .lock()
            .unwrap()
            .iter()
            .find(|(matcher, _)| request.prompt.contains(matcher))
            .map(|(_, summary)| summary.clone())
            .unwrap_or_else(|| format!("Completed: {}", request.prompt));
        Ok(AgentOutcome::summary(summary))
    }
}
