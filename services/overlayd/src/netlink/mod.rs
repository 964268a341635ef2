//! Host link, address and route operations.
//!
//! The overlay core makes every kernel change through the [`LinkOps`]
//! capability. Two implementations are provided:
//!
//! - [`IpCommand`]: drives the kernel through the `ip` tool (JSON output)
//! - [`MockNetlink`]: in-memory kernel for tests and dry runs
//!
//! Operations are synchronous. They are fast, and once started they run to
//! completion; nothing here observes cancellation.

mod ip;
mod mock;

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;
use vlanet_networking::{HardwareAddr, Ipv4Net};

pub use ip::IpCommand;
pub use mock::{MockNetlink, MockOp};

/// Errors from link operations.
#[derive(Debug, Error)]
pub enum NetlinkError {
    /// The object being created is already present (EEXIST).
    #[error("{0}: already exists")]
    AlreadyExists(String),

    /// The object being looked up does not exist.
    #[error("{0}: not found")]
    NotFound(String),

    /// Any other kernel failure.
    #[error("{op} failed: {detail}")]
    Failed { op: String, detail: String },

    /// The `ip` tool produced output we could not decode.
    #[error("unexpected output from {op}: {detail}")]
    Parse { op: String, detail: String },

    /// The `ip` tool could not be executed.
    #[error("failed to execute ip command: {0}")]
    Io(#[from] std::io::Error),
}

impl NetlinkError {
    /// Returns true for the EEXIST class of failures.
    pub fn is_exists(&self) -> bool {
        matches!(self, NetlinkError::AlreadyExists(_))
    }

    /// Returns true when the target object is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetlinkError::NotFound(_))
    }
}

/// Kind of a link as reported by the kernel (`linkinfo.info_kind`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// 802.1Q VLAN sub-interface.
    Vlan,
    /// Physical device; the kernel reports no kind for these.
    Device,
    /// Anything else (bridge, vxlan, veth, dummy, ...).
    Other(String),
}

impl LinkKind {
    /// Map a kernel `info_kind` string.
    pub fn from_info_kind(kind: Option<&str>) -> Self {
        match kind {
            None | Some("") => LinkKind::Device,
            Some("vlan") => LinkKind::Vlan,
            Some(other) => LinkKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Vlan => write!(f, "vlan"),
            LinkKind::Device => write!(f, "device"),
            LinkKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// Desired identity of a VLAN link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    /// Interface name.
    pub name: String,

    /// 802.1Q tag.
    pub vlan_id: u16,

    /// Kernel index of the link the VLAN is stacked on.
    pub parent_index: u32,
}

impl LinkSpec {
    /// Create a VLAN link spec.
    pub fn vlan(name: impl Into<String>, vlan_id: u16, parent_index: u32) -> Self {
        Self {
            name: name.into(),
            vlan_id,
            parent_index,
        }
    }
}

/// A live link and its realized attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Kernel interface index.
    pub index: u32,

    /// Interface name.
    pub name: String,

    /// Link kind.
    pub kind: LinkKind,

    /// VLAN tag, for VLAN links.
    pub vlan_id: Option<u16>,

    /// Index of the lower link, when the kernel reports one.
    pub parent_index: Option<u32>,

    /// Hardware address.
    pub hardware_addr: HardwareAddr,

    /// MTU.
    pub mtu: u32,

    /// Administratively up.
    pub up: bool,
}

/// Route scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    /// Reachable anywhere (`scope global`).
    Universe,
    /// Directly attached (`scope link`).
    Link,
    /// Local to this host (`scope host`).
    Host,
}

impl RouteScope {
    /// Name understood by `ip route`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteScope::Universe => "global",
            RouteScope::Link => "link",
            RouteScope::Host => "host",
        }
    }
}

/// An IPv4 route through a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Output link index.
    pub link_index: u32,

    /// Destination prefix (host bits cleared).
    pub dst: Ipv4Net,

    /// Next hop, installed as an on-link gateway.
    pub gateway: Option<Ipv4Addr>,

    /// Scope.
    pub scope: RouteScope,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dst)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        write!(f, " dev #{} scope {}", self.link_index, self.scope.as_str())
    }
}

/// Link configuration capability.
///
/// Mirrors the rtnetlink operations the overlay needs. Implementations must
/// report EEXIST as [`NetlinkError::AlreadyExists`] for `link_add`,
/// `addr_add` and `route_add`.
pub trait LinkOps: Send + Sync {
    /// Create a VLAN link and return its kernel index.
    fn link_add(&self, spec: &LinkSpec) -> Result<u32, NetlinkError>;

    /// Look up a link by name.
    fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError>;

    /// Look up a link by kernel index.
    fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError>;

    /// Delete a link.
    fn link_del(&self, link: &Link) -> Result<(), NetlinkError>;

    /// Set a link administratively up.
    fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError>;

    /// List IPv4 addresses on a link.
    fn addr_list_v4(&self, link: &Link) -> Result<Vec<Ipv4Net>, NetlinkError>;

    /// Add an IPv4 address to a link.
    fn addr_add(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError>;

    /// Remove an IPv4 address from a link.
    fn addr_del(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError>;

    /// Add a route.
    fn route_add(&self, route: &Route) -> Result<(), NetlinkError>;
}
