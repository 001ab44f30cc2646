//! Error types for stockfeed-core.

use thiserror::Error;

/// Core error types.
///
/// Only malformed local input ends up here; these are rejected before
/// any side effect takes place.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid value: {0} is not a finite number")]
    InvalidValue(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
