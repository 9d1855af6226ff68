//! Store error types.

use fleetops_types::{MachineId, OperationId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No machine with this id exists.
    #[error("machine not found: {0}")]
    MachineNotFound(MachineId),

    /// No operation with this id exists.
    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    /// The machine already has a different active operation in flight.
    #[error("machine {machine_id} has an active operation ({active_operation_id})")]
    MachineHasActiveOperation {
        machine_id: MachineId,
        active_operation_id: OperationId,
    },

    /// The operation is already SUCCEEDED or FAILED and cannot be canceled.
    #[error("operation {0} already finished")]
    OperationAlreadyFinished(OperationId),
}

impl StoreError {
    /// Returns true if this is a `MachineNotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MachineNotFound(_) | Self::OperationNotFound(_)
        )
    }

    /// Returns true if this is a `MachineHasActiveOperation` error.
    pub fn is_active_operation_conflict(&self) -> bool {
        matches!(self, Self::MachineHasActiveOperation { .. })
    }

    /// Returns true if this is an `OperationAlreadyFinished` error.
    pub fn is_already_finished(&self) -> bool {
        matches!(self, Self::OperationAlreadyFinished(_))
    }
}
