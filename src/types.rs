//! Core vocabulary: statuses, log levels, agent types, tunable constants.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Recovery attempts per action before it is marked failed.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 2;

/// Maximum sub-action nesting depth. A sub-action task inside an action at
/// this depth fails instead of spawning a child.
pub const MAX_SUB_ACTION_DEPTH: u32 = 3;

/// How long the scheduler sleeps when tasks are running but none are ready.
pub const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Keepalive interval for observer streams (ping after this much silence).
pub const OBSERVER_KEEPALIVE: Duration = Duration::from_secs(30);

/// Sentinel error recorded on tasks that failed only because an upstream
/// dependency failed. Recovery never treats these as root causes.
pub const DEPENDENCY_FAILED: &str = "Dependency failed";

/// Bounded capacity of each event-bus subscriber queue.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// STATUSES
// ============================================================================

/// Lifecycle of an action.
///
/// `draft -> running -> {completed, failed}`; cancellation is the only
/// transition back to `draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Draft => "draft",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single task within an action's DAG.
///
/// A terminal task can return to `pending` through a live edit, an
/// invalidation cascade, or a recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Severity of a persisted task log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// AGENT TYPES
// ============================================================================

/// Symbolic agent-type labels understood by the planner.
///
/// All of these are opaque to the core except [`agent_type::SUB_ACTION`],
/// which the orchestrator wires to the recursive sub-action runner.
pub mod agent_type {
    pub const DATA_RETRIEVAL: &str = "data_retrieval";
    pub const CODE_EXECUTION: &str = "code_execution";
    pub const SPREADSHEET: &str = "spreadsheet";
    pub const REPORT: &str = "report";
    pub const GENERAL: &str = "general";
    pub const ARXIV_SEARCH: &str = "arxiv_search";
    pub const SUB_ACTION: &str = "sub_action";

    /// Every agent type the stock planner may emit.
    pub const BUILTIN: [&str; 7] = [
        DATA_RETRIEVAL,
        CODE_EXECUTION,
        SPREADSHEET,
        REPORT,
        GENERAL,
        ARXIV_SEARCH,
        SUB_ACTION,
    ];
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
