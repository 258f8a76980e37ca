//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while constructing a bot configuration.
///
/// These are fatal and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported broker: {0}")]
    UnsupportedBroker(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
