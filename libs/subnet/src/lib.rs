//! Types exchanged between overlay backends and the subnet lease allocator.
//!
//! - [`NetworkConfig`]: the daemon's per-network configuration, including the
//!   opaque backend-specific blob.
//! - [`LeaseAttrs`]: what a host advertises when it asks for a lease.
//! - [`Lease`]: what the allocator hands back.

pub mod config;
pub mod error;
pub mod lease;

pub use config::{BackendSection, NetworkConfig, DEFAULT_BACKEND_TYPE};
pub use error::SubnetError;
pub use lease::{Lease, LeaseAttrs};
