//! Drives operations to completion against a [`fleetops_provider::Provider`].
//!
//! This crate owns the only tokio tasks in the system that mutate operation
//! state after creation: one task per in-flight operation, spawned by
//! [`Runner::start_operation`] and supervised for panics.

pub mod bounded_queue;
pub mod error;
pub mod events;
pub mod runner;

pub use error::{ExecutorError, ExecutorResult};
pub use events::{EventBus, LogBus, LogChunk, OperationEvent, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use runner::{RetryConfig, Runner};
