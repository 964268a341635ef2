//! The host's external (uplink) interface.

use std::net::Ipv4Addr;

use tracing::{info, warn};
use vlanet_networking::validate_mtu;

use super::DeviceError;
use crate::netlink::{Link, LinkOps};

/// Uplink the overlay VLAN is stacked on.
#[derive(Debug, Clone)]
pub struct ExternalInterface {
    /// The uplink.
    pub iface: Link,

    /// IPv4 address configured on the uplink.
    pub iface_addr: Ipv4Addr,

    /// Address other hosts reach this one on; usually `iface_addr`, but
    /// differs behind NAT.
    pub ext_addr: Ipv4Addr,
}

impl ExternalInterface {
    /// Resolve the uplink by name.
    ///
    /// `public_ip` overrides the advertised address. Without it the first
    /// IPv4 address on the interface is used.
    pub fn lookup(
        ops: &dyn LinkOps,
        name: &str,
        public_ip: Option<Ipv4Addr>,
    ) -> Result<Self, DeviceError> {
        let iface = ops
            .link_by_name(name)
            .map_err(|source| DeviceError::Lookup {
                name: name.to_string(),
                source,
            })?;

        let addrs = ops
            .addr_list_v4(&iface)
            .map_err(|source| DeviceError::AddrList {
                link: name.to_string(),
                source,
            })?;

        let iface_addr = match (addrs.first(), public_ip) {
            (Some(addr), _) => addr.address,
            (None, Some(public_ip)) => public_ip,
            (None, None) => return Err(DeviceError::NoAddress(name.to_string())),
        };
        let ext_addr = public_ip.unwrap_or(iface_addr);

        if let Err(e) = validate_mtu(iface.mtu) {
            warn!(iface = %iface.name, error = %e, "Unusual MTU on external interface");
        }

        info!(
            iface = %iface.name,
            index = iface.index,
            mtu = iface.mtu,
            iface_addr = %iface_addr,
            ext_addr = %ext_addr,
            "Using external interface"
        );

        Ok(Self {
            iface,
            iface_addr,
            ext_addr,
        })
    }

    /// Kernel index of the uplink.
    pub fn index(&self) -> u32 {
        self.iface.index
    }

    /// Uplink MTU.
    pub fn mtu(&self) -> u32 {
        self.iface.mtu
    }
}
