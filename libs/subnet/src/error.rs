//! Error types for lease and network configuration handling.

use thiserror::Error;
use vlanet_networking::NetworkError;

/// Errors raised while decoding allocator-facing types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubnetError {
    /// The network configuration could not be decoded.
    #[error("invalid network config: {0}")]
    InvalidConfig(String),

    /// A prefix or address in the configuration is invalid.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SubnetError {
    fn from(err: serde_json::Error) -> Self {
        SubnetError::Serialization(err.to_string())
    }
}
