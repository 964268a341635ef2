//! Overlay link management.
//!
//! This module owns the host side of the overlay:
//!
//! - [`LinkRegistry`]: at most one device per link name in the process
//! - [`LinkReconciler`]: brings a VLAN link into existence, reusing a
//!   compatible leftover and recreating an incompatible one
//! - [`VlanDevice`]: applies the overlay address and route to the link
//! - [`ExternalInterface`]: the uplink the VLAN is stacked on

mod device;
mod external;
mod reconcile;
mod registry;

use thiserror::Error;
use vlanet_networking::{Ipv4Net, NetworkError};

use crate::netlink::NetlinkError;

pub use device::VlanDevice;
pub use external::ExternalInterface;
pub use reconcile::{links_incompat, LinkReconciler};
pub use registry::{LinkClaim, LinkRegistry};

/// Errors from overlay device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Another device in this process already owns the link name.
    #[error("link {0} is already owned by another device in this process")]
    InUse(String),

    /// The requested link identity is unusable.
    #[error("invalid link spec: {0}")]
    InvalidSpec(#[from] NetworkError),

    /// An incompatible leftover link could not be removed.
    #[error("failed to delete interface {name}: {source}")]
    DeleteFailed {
        name: String,
        #[source]
        source: NetlinkError,
    },

    /// Link creation failed.
    #[error("failed to create vlan interface {name}: {source}")]
    CreateFailed {
        name: String,
        #[source]
        source: NetlinkError,
    },

    /// The link could not be found by index right after creation.
    #[error("can't locate created vlan device with index {index}: {source}")]
    Missing {
        index: u32,
        #[source]
        source: NetlinkError,
    },

    /// The link found by index is not a VLAN.
    #[error("created vlan device with index {index} is not vlan (found {kind})")]
    NotVlan { index: u32, kind: String },

    /// Listing addresses failed.
    #[error("failed to list IPv4 addresses on {link}: {source}")]
    AddrList {
        link: String,
        #[source]
        source: NetlinkError,
    },

    /// A stale address could not be removed.
    #[error("failed to delete IPv4 addr {addr} from {link}: {source}")]
    AddrDel {
        addr: Ipv4Net,
        link: String,
        #[source]
        source: NetlinkError,
    },

    /// The overlay address could not be added.
    #[error("failed to add IP address {addr} to {link}: {source}")]
    AddrAdd {
        addr: Ipv4Net,
        link: String,
        #[source]
        source: NetlinkError,
    },

    /// The link could not be brought up.
    #[error("failed to set interface {link} to UP state: {source}")]
    LinkUp {
        link: String,
        #[source]
        source: NetlinkError,
    },

    /// The overlay route could not be installed.
    #[error("failed to add route ({dst} -> {link}): {source}")]
    RouteAdd {
        dst: Ipv4Net,
        link: String,
        #[source]
        source: NetlinkError,
    },

    /// The uplink has no IPv4 address to use as the public address.
    #[error("interface {0} has no IPv4 address; set an explicit public IP")]
    NoAddress(String),

    /// The uplink could not be inspected.
    #[error("failed to look up interface {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: NetlinkError,
    },

    /// A blocking link operation task panicked or was cancelled.
    #[error("link operation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Any other link operation failure.
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
}
