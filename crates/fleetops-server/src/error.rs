//! Server error types and their mapping onto gRPC status codes.

use std::net::SocketAddr;

use thiserror::Error;
use tonic::Status;

/// Result type for service shell operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while starting [`crate::serve`], before any request ever
/// reaches [`ServerError`] — a failed bind never crosses the gRPC boundary.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Errors raised by the service shell itself. This is the only error type
/// that crosses the gRPC boundary — every lower-layer error is translated
/// into one of these variants before it reaches a handler's return path.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A required field was missing, empty, or otherwise malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No machine or operation exists with the given id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state of the machine or
    /// operation (wrong phase, an active operation already in flight, or
    /// a cancel on an already-terminal operation).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Something that should be impossible happened (e.g. a store replace
    /// race left the record in an inconsistent state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_failed_precondition(&self) -> bool {
        matches!(self, Self::FailedPrecondition(_))
    }
}

impl From<fleetops_store::StoreError> for ServerError {
    fn from(err: fleetops_store::StoreError) -> Self {
        use fleetops_store::StoreError;
        match err {
            StoreError::MachineNotFound(_) | StoreError::OperationNotFound(_) => {
                ServerError::NotFound(err.to_string())
            }
            StoreError::MachineHasActiveOperation { .. } | StoreError::OperationAlreadyFinished(_) => {
                ServerError::FailedPrecondition(err.to_string())
            }
        }
    }
}

impl From<fleetops_executor::ExecutorError> for ServerError {
    fn from(err: fleetops_executor::ExecutorError) -> Self {
        use fleetops_executor::ExecutorError;
        match err {
            ExecutorError::Store(store_err) => store_err.into(),
            ExecutorError::UnknownPlan(_) => ServerError::Internal(err.to_string()),
        }
    }
}

impl From<fleetops_proto::ConvertError> for ServerError {
    fn from(err: fleetops_proto::ConvertError) -> Self {
        ServerError::InvalidArgument(err.to_string())
    }
}

impl From<ServerError> for Status {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::InvalidArgument(msg) => Status::invalid_argument(msg),
            ServerError::NotFound(msg) => Status::not_found(msg),
            ServerError::FailedPrecondition(msg) => Status::failed_precondition(msg),
            ServerError::Internal(msg) => Status::internal(msg),
        }
    }
}
