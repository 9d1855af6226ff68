//! Errors converting between wire messages and `fleetops_types`.

use thiserror::Error;

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Raised when a wire message can't be turned into a domain type: a required
/// field was absent, or an enum value has no domain-side counterpart.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("phase `{0:?}` has no RPC-facing representation (RMA/RETIRED are store-internal)")]
    UnrepresentablePhase(fleetops_types::Phase),

    #[error("unknown enum value {0} for `{1}`")]
    UnknownEnumValue(i32, &'static str),
}
