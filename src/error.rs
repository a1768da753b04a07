//! Top-level error type for the orchestration core.
//!
//! Each layer keeps its own error enum next to its module (`StoreError` in
//! [`store`](crate::store), `AgentError` in [`agent`](crate::agent),
//! `PlanError` in [`planner`](crate::planner)); this module wraps the ones
//! that cross the public API. Agent failures never appear here: they are
//! encoded as task status, not propagated as errors.

use thiserror::Error;

use crate::store::StoreError;

/// Error returned by supervisor and orchestrator entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The store failed during a status transition or row access. Status
    /// transitions are never silently retried; the run terminates with the
    /// action left in its current persisted state.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A live edit would corrupt the DAG (unknown dependency, self
    /// reference, or cycle).
    #[error("invalid task edit: {0}")]
    InvalidEdit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_wraps_transparently() {
        let err: CoreError = StoreError::ActionNotFound("a1".into()).into();
        assert_eq!(err.to_string(), "action not found: a1");
    }

    #[test]
    fn invalid_edit_names_the_problem() {
        let err = CoreError::InvalidEdit("dependency cycle through t2".into());
        assert!(err.to_string().contains("cycle"));
    }
}
