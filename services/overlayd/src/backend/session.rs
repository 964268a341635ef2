//! A registered VLAN network.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vlanet_networking::Ipv4Net;
use vlanet_subnet::Lease;

use super::Network;
use crate::context::Context;
use crate::network::{ExternalInterface, VlanDevice};

/// This host's participation in one VLAN overlay network.
///
/// Dropping it releases the link name claim but leaves the link, address and
/// route in place; a later registration reconciles them.
pub struct VlanNetwork {
    name: String,
    ext_iface: Arc<ExternalInterface>,
    device: VlanDevice,
    overlay: Ipv4Net,
    lease: Lease,
}

impl VlanNetwork {
    pub(crate) fn new(
        name: &str,
        ext_iface: Arc<ExternalInterface>,
        device: VlanDevice,
        overlay: Ipv4Net,
        lease: Lease,
    ) -> Self {
        Self {
            name: name.to_string(),
            ext_iface,
            device,
            overlay,
            lease,
        }
    }

    /// The configured VLAN device.
    pub fn device(&self) -> &VlanDevice {
        &self.device
    }

    /// The uplink the VLAN rides on.
    pub fn external_interface(&self) -> &ExternalInterface {
        &self.ext_iface
    }

    /// Overlay address applied to the device (lease address, network prefix).
    pub fn overlay(&self) -> Ipv4Net {
        self.overlay
    }
}

impl std::fmt::Debug for VlanNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlanNetwork")
            .field("name", &self.name)
            .field("device", &self.device)
            .field("overlay", &self.overlay)
            .field("lease", &self.lease)
            .finish()
    }
}

#[async_trait]
impl Network for VlanNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn mtu(&self) -> u32 {
        self.ext_iface.mtu()
    }

    async fn run(&self, ctx: &Context) {
        debug!(network = %self.name, link = %self.device.name(), "Network running");
        ctx.done().await;
    }
}
