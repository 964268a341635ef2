//! Overlay backends.
//!
//! A [`Backend`] turns a network's configuration into this host's
//! participation in that network, a [`Network`]. Backends are picked by type
//! through the [`BackendManager`].

mod manager;
mod session;
mod vlan;

use std::sync::Arc;

use async_trait::async_trait;
use vlanet_subnet::{Lease, NetworkConfig};

use crate::context::Context;
use crate::error::BackendError;
use crate::netlink::LinkOps;
use crate::network::{ExternalInterface, LinkRegistry};
use crate::subnet::SubnetManager;

pub use manager::{BackendCtor, BackendManager};
pub use session::VlanNetwork;
pub use vlan::{
    link_name, new_subnet_attrs, VlanBackend, VlanBackendConfig, VlanLeaseAttrs,
    BACKEND_TYPE as VLAN_BACKEND_TYPE, LINK_NAME_PREFIX,
};

/// Shared collaborators handed to every backend constructor.
#[derive(Clone)]
pub struct BackendDeps {
    pub subnet_mgr: Arc<dyn SubnetManager>,
    pub ext_iface: Arc<ExternalInterface>,
    pub ops: Arc<dyn LinkOps>,
    pub registry: LinkRegistry,
}

/// An overlay encapsulation strategy.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start participating in `network`.
    async fn register_network(
        &self,
        ctx: &Context,
        network: &str,
        config: &NetworkConfig,
    ) -> Result<Box<dyn Network>, BackendError>;

    /// Backend-wide work; returns when `ctx` finishes.
    async fn run(&self, ctx: &Context);
}

/// This host's participation in one overlay network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Network name.
    fn name(&self) -> &str;

    /// The lease this host holds in the network.
    fn lease(&self) -> &Lease;

    /// MTU of the external interface.
    fn mtu(&self) -> u32;

    /// Per-network work; returns when `ctx` finishes.
    async fn run(&self, ctx: &Context);
}
