//! The VLAN backend.
//!
//! Registration runs strictly in order: reconcile the link, acquire a lease
//! bound to the link's MAC, then configure the link from the lease. The
//! allocator call is the only point where registration waits.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vlanet_networking::{validate_vlan_id, HardwareAddr, Ipv4Net};
use vlanet_subnet::{LeaseAttrs, NetworkConfig, SubnetError};

use super::{Backend, BackendDeps, Network, VlanNetwork};
use crate::context::Context;
use crate::error::BackendError;
use crate::netlink::LinkSpec;
use crate::network::{DeviceError, VlanDevice};
use crate::subnet::LeaseError;

/// Backend type string.
pub const BACKEND_TYPE: &str = "vlan";

/// Prefix of every VLAN link this backend creates.
pub const LINK_NAME_PREFIX: &str = "vlanet.";

/// Name of the link carrying VLAN `vlan_id`, stable across restarts.
pub fn link_name(vlan_id: u16) -> String {
    format!("{}{}", LINK_NAME_PREFIX, vlan_id)
}

/// The backend section of the network configuration.
///
/// ```json
/// {"Type": "vlan", "VlanId": 42, "Gateway": "10.1.0.1"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VlanBackendConfig {
    /// 802.1Q tag; 0 means unset.
    #[serde(rename = "VlanId", alias = "vlanId", default)]
    pub vlan_id: i64,

    /// Next hop for the overlay route.
    #[serde(rename = "Gateway", alias = "gateway", default)]
    pub gateway: Option<String>,
}

impl VlanBackendConfig {
    /// Decode the backend section; a missing section leaves everything unset.
    pub fn from_network_config(config: &NetworkConfig) -> Result<Self, BackendError> {
        match &config.backend {
            None => Ok(Self::default()),
            Some(value) if value.is_null() => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                BackendError::Config(format!("error decoding VLAN backend config: {}", e))
            }),
        }
    }

    /// Checked VLAN tag.
    pub fn vlan_id(&self) -> Result<u16, BackendError> {
        if self.vlan_id == 0 {
            return Err(BackendError::Config(
                "VlanId must be set to a non-zero value".to_string(),
            ));
        }
        validate_vlan_id(self.vlan_id).map_err(|e| BackendError::Config(e.to_string()))
    }

    /// Checked gateway: a host address inside `network`.
    pub fn gateway(&self, network: Ipv4Net) -> Result<Option<Ipv4Addr>, BackendError> {
        let gateway = match self.gateway.as_deref().map(str::trim) {
            None | Some("") => return Ok(None),
            Some(gateway) => gateway,
        };

        let addr: Ipv4Addr = gateway
            .parse()
            .map_err(|_| BackendError::Config(format!("invalid Gateway: {}", gateway)))?;

        let network = network.network();
        if !network.contains(addr) || addr == network.address {
            return Err(BackendError::Config(format!(
                "gateway {} is not a host address in {}",
                addr, network
            )));
        }

        Ok(Some(addr))
    }
}

/// Backend payload of the lease attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlanLeaseAttrs {
    #[serde(rename = "VtepMAC")]
    pub vtep_mac: HardwareAddr,
}

/// Lease attributes advertising `public_ip` and the link's MAC.
pub fn new_subnet_attrs(public_ip: Ipv4Addr, mac: HardwareAddr) -> Result<LeaseAttrs, SubnetError> {
    LeaseAttrs::new(public_ip, BACKEND_TYPE, &VlanLeaseAttrs { vtep_mac: mac })
}

/// VLAN overlay backend.
pub struct VlanBackend {
    deps: BackendDeps,
}

impl VlanBackend {
    pub fn new(deps: BackendDeps) -> Self {
        Self { deps }
    }

    /// Register this host in `network` and return the concrete session.
    pub async fn register(
        &self,
        ctx: &Context,
        network: &str,
        config: &NetworkConfig,
    ) -> Result<VlanNetwork, BackendError> {
        let cfg = VlanBackendConfig::from_network_config(config)?;
        let vlan_id = cfg.vlan_id()?;
        let gateway = cfg.gateway(config.network)?;

        let spec = LinkSpec::vlan(link_name(vlan_id), vlan_id, self.deps.ext_iface.index());
        debug!(network = %network, link = %spec.name, vlan_id, "Registering network");

        // link operations shell out or talk netlink synchronously; keep them
        // off the async workers
        let ops = Arc::clone(&self.deps.ops);
        let registry = self.deps.registry.clone();
        let device = tokio::task::spawn_blocking(move || VlanDevice::create(ops, &registry, &spec))
            .await
            .map_err(DeviceError::from)??
            .with_gateway(gateway);

        let attrs = new_subnet_attrs(self.deps.ext_iface.ext_addr, device.mac_addr())?;

        let lease = tokio::select! {
            err = ctx.done() => return Err(LeaseError::from(err).into()),
            result = self.deps.subnet_mgr.acquire_lease(ctx, network, &attrs) => result?,
        };

        if lease.is_expired() {
            return Err(BackendError::Allocation(LeaseError::Other(anyhow::anyhow!(
                "allocator granted lease for {} that expired at {:?}",
                lease.subnet,
                lease.expiration
            ))));
        }

        // the link carries the whole overlay (e.g. /16), not just this
        // host's subnet (e.g. /24)
        let overlay = lease
            .subnet
            .with_prefix_len(config.network.prefix_len)
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let (device, configured) = tokio::task::spawn_blocking(move || {
            let result = device.configure(overlay);
            (device, result)
        })
        .await
        .map_err(DeviceError::from)?;

        if let Err(e) = configured {
            warn!(
                network = %network,
                subnet = %lease.subnet,
                error = %e,
                "Device configuration failed; lease left to expire"
            );
            return Err(e.into());
        }

        info!(
            network = %network,
            link = %device.name(),
            subnet = %lease.subnet,
            overlay = %overlay,
            "Network registered"
        );

        Ok(VlanNetwork::new(
            network,
            Arc::clone(&self.deps.ext_iface),
            device,
            overlay,
            lease,
        ))
    }
}

#[async_trait]
impl Backend for VlanBackend {
    async fn register_network(
        &self,
        ctx: &Context,
        network: &str,
        config: &NetworkConfig,
    ) -> Result<Box<dyn Network>, BackendError> {
        let network = self.register(ctx, network, config).await?;
        Ok(Box::new(network))
    }

    async fn run(&self, ctx: &Context) {
        ctx.done().await;
    }
}
