//! # Foreman
//!
//! Orchestration core for agentic workflows. A natural-language *action* is
//! decomposed by a [`Planner`] into a DAG of *tasks*, each labelled with an
//! agent type; the core executes the DAG with maximum parallelism, streams
//! progress over a per-action event bus, survives individual task failures
//! by asking the planner for a replacement sub-plan, supports mid-run edits
//! that invalidate downstream work, and lets a task expand recursively into
//! a child action.
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`event_bus`] | Per-action pub/sub with bounded, drop-on-overflow queues |
//! | [`store`] | Persistence contract + in-memory reference store |
//! | [`planner`] | Initial DAG planning and recovery sub-plans |
//! | [`agent`] | Agent-runner contract, registry, task log sink |
//! | `scheduler` | Topological dispatch of ready tasks (internal) |
//! | [`invalidate`] | Live-edit reverse-BFS invalidation |
//! | `recovery` | Root-cause repair between scheduler passes (internal) |
//! | `supervisor` | Cancellable per-action execution loop (internal) |
//! | [`orchestrator`] | Facade: create / run / edit / cancel / delete / observe |
//! | [`observe`] | Snapshot-then-tail observer streams with keepalive |
//!
//! The planner, the store, and the individual agents are collaborators
//! behind narrow traits; the core never looks inside them.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use foreman::{MemoryStore, Orchestrator, StaticPlanner, TaskSpec};
//!
//! let store = Arc::new(MemoryStore::new());
//! let planner = Arc::new(StaticPlanner::new(vec![
//!     TaskSpec::new("fetch the data", "data_retrieval"),
//!     TaskSpec::new("write the report", "report").with_dependencies(vec![0]),
//! ]));
//! let orchestrator = Orchestrator::new(store, planner);
//! orchestrator.agents().register("data_retrieval", my_retrieval_agent);
//! orchestrator.agents().register("report", my_report_agent);
//!
//! let action = orchestrator.create_action("Demo", "fetch and report").await?;
//! let mut observer = orchestrator.observe(&action.id).await?;
//! orchestrator.run_action(&action.id).await?;
//! # Ok::<(), foreman::CoreError>(())
//! ```

pub mod agent;
pub mod dag;
pub mod error;
pub mod event_bus;
pub mod invalidate;
pub mod model;
pub mod observe;
pub mod orchestrator;
pub mod planner;
mod recovery;
mod scheduler;
pub mod store;
mod supervisor;
pub mod types;

pub use agent::{
    mock::MockAgent, AgentError, AgentOutcome, AgentRegistry, AgentRequest, AgentRunner,
    TaskLogger,
};
pub use error::CoreError;
pub use event_bus::{Event, EventBus, Subscription};
pub use invalidate::{invalidate_downstream, Invalidation};
pub use model::{Action, Artifact, LogEntry, Task, TaskOutput};
pub use observe::Observer;
pub use orchestrator::{Orchestrator, TaskEdit};
pub use planner::{
    fallback_plan, PlanError, Planner, RecoveryPlan, RecoveryRequest, ReplacementSpec,
    StaticPlanner, TaskSpec,
};
pub use store::{MemoryStore, Store, StoreError};
pub use types::{
    agent_type, ActionStatus, LogLevel, TaskStatus, DEPENDENCY_FAILED, MAX_RECOVERY_ATTEMPTS,
    MAX_SUB_ACTION_DEPTH, OBSERVER_KEEPALIVE, SCHEDULER_POLL_INTERVAL,
};
