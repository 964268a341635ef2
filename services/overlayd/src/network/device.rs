//! The VLAN overlay device.
//!
//! Host-side setup:
//! - VLAN link named after its tag, stacked on the uplink
//! - a single /32 overlay address (source address for host-to-workload
//!   traffic; /32 so the kernel adds no broadcast route via this link)
//! - a route for the whole overlay network through the link

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info};
use vlanet_networking::{validate_link_name, HardwareAddr, Ipv4Net};

use super::{DeviceError, LinkClaim, LinkReconciler, LinkRegistry};
use crate::netlink::{Link, LinkOps, LinkSpec, Route, RouteScope};

/// A reconciled VLAN link owned by this process.
pub struct VlanDevice {
    ops: Arc<dyn LinkOps>,
    link: Link,
    gateway: Option<Ipv4Addr>,
    _claim: LinkClaim,
}

impl std::fmt::Debug for VlanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlanDevice")
            .field("link", &self.link)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl VlanDevice {
    /// Claim the link name and reconcile the link.
    pub fn create(
        ops: Arc<dyn LinkOps>,
        registry: &LinkRegistry,
        spec: &LinkSpec,
    ) -> Result<Self, DeviceError> {
        validate_link_name(&spec.name)?;
        let claim = registry.claim(&spec.name)?;

        let link = LinkReconciler::new(Arc::clone(&ops)).ensure(spec)?;

        Ok(Self {
            ops,
            link,
            gateway: None,
            _claim: claim,
        })
    }

    /// Route overlay traffic through `gateway` instead of on-link.
    pub fn with_gateway(mut self, gateway: Option<Ipv4Addr>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Hardware address advertised to other hosts.
    pub fn mac_addr(&self) -> HardwareAddr {
        self.link.hardware_addr
    }

    /// The underlying link as seen when it was reconciled.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Configured gateway, if any.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    /// Apply the overlay address and route.
    ///
    /// `net` is this host's overlay address with the whole network's prefix
    /// length (e.g. 10.1.2.0/16). Safe to call repeatedly.
    pub fn configure(&self, net: Ipv4Net) -> Result<(), DeviceError> {
        let name = &self.link.name;

        self.set_addr4(net.host_scoped())?;

        self.ops
            .link_set_up(&self.link)
            .map_err(|source| DeviceError::LinkUp {
                link: name.clone(),
                source,
            })?;

        // added explicitly: if another tool already routes the subnet the
        // kernel will not add one for this link on its own
        let route = Route {
            link_index: self.link.index,
            dst: net.network(),
            gateway: self.gateway,
            scope: RouteScope::Universe,
        };
        match self.ops.route_add(&route) {
            Ok(()) => {}
            Err(e) if e.is_exists() => {
                debug!(link = %name, route = %route, "Route already present");
            }
            Err(source) => {
                return Err(DeviceError::RouteAdd {
                    dst: route.dst,
                    link: name.clone(),
                    source,
                });
            }
        }

        info!(
            link = %name,
            address = %net.host_scoped(),
            route = %route.dst,
            gateway = ?self.gateway,
            "Vlan device configured"
        );

        Ok(())
    }

    /// Replace every IPv4 address on the link with `addr`.
    fn set_addr4(&self, addr: Ipv4Net) -> Result<(), DeviceError> {
        let name = &self.link.name;

        let existing = self
            .ops
            .addr_list_v4(&self.link)
            .map_err(|source| DeviceError::AddrList {
                link: name.clone(),
                source,
            })?;

        for old in existing {
            debug!(link = %name, addr = %old, "Removing IPv4 address");
            self.ops
                .addr_del(&self.link, old)
                .map_err(|source| DeviceError::AddrDel {
                    addr: old,
                    link: name.clone(),
                    source,
                })?;
        }

        self.ops
            .addr_add(&self.link, addr)
            .map_err(|source| DeviceError::AddrAdd {
                addr,
                link: name.clone(),
                source,
            })
    }
}
