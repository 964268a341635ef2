//! vlanet overlay daemon library
//!
//! Joins this host to a VLAN overlay network: it reconciles an 802.1Q link on
//! the external interface, leases a subnet from the allocator with the link's
//! MAC attached, and applies the overlay address and route to the link.
//!
//! ## Modules
//!
//! - `netlink`: link capability trait, the `ip` command implementation and an
//!   in-memory kernel
//! - `network`: link reconciliation, the VLAN device and the external interface
//! - `subnet`: lease allocator clients
//! - `backend`: backends, networks and the backend manager

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod netlink;
pub mod network;
pub mod subnet;

// Re-export commonly used types
pub use backend::{Backend, BackendDeps, BackendManager, Network, VlanBackend, VlanNetwork};
pub use context::{CancelHandle, Context, ContextError};
pub use error::BackendError;
pub use network::{DeviceError, ExternalInterface, LinkRegistry, VlanDevice};
pub use subnet::{HttpSubnetManager, LeaseError, MockSubnetManager, SubnetManager};
