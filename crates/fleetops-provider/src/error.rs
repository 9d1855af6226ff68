//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a provider implementation can return. Providers are not retried at
/// this layer — the executor owns the retry budget.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The operation's cancellation token fired before the provider call
    /// completed.
    #[error("provider operation canceled")]
    Canceled,

    /// The underlying hardware/cluster action failed.
    #[error("provider operation failed: {0}")]
    Failed(String),
}

impl ProviderError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
