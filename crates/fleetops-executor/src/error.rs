//! Executor error types.

use fleetops_types::OperationId;
use thiserror::Error;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors that can occur while starting or canceling an operation. Failures
/// that occur *during* execution are recorded on the operation itself
/// (`Operation::error`), not returned here — there is no caller left to
/// return them to once a step task has been spawned.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] fleetops_store::StoreError),

    #[error("operation {0} has no plan registered for its plan id")]
    UnknownPlan(OperationId),
}
