//! Backend error types.

use thiserror::Error;
use vlanet_subnet::SubnetError;

use crate::network::DeviceError;
use crate::subnet::LeaseError;

/// Errors surfaced by backends and the backend manager.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Malformed or missing backend configuration. Nothing was touched.
    #[error("{0}")]
    Config(String),

    /// A link operation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The context was cancelled before registration finished.
    #[error("context canceled")]
    Cancelled,

    /// The context's deadline passed before registration finished.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The allocator refused or failed the lease request.
    #[error("failed to acquire lease: {0}")]
    Allocation(#[source] LeaseError),

    /// No backend is registered for the requested type.
    #[error("unknown backend type: {0}")]
    UnknownBackend(String),

    /// Lease attributes could not be encoded.
    #[error("failed to encode lease attributes: {0}")]
    LeaseAttrs(#[from] SubnetError),
}

impl BackendError {
    /// Returns true for cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BackendError::Cancelled | BackendError::DeadlineExceeded)
    }
}

impl From<LeaseError> for BackendError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Cancelled => BackendError::Cancelled,
            LeaseError::DeadlineExceeded => BackendError::DeadlineExceeded,
            other => BackendError::Allocation(other),
        }
    }
}
