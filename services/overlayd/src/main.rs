//! vlanet overlay daemon
//!
//! Runs on every host of the overlay. It resolves the external interface,
//! picks the backend named by the network configuration, registers the host in
//! the network and then waits for shutdown.
//!
//! Kernel state (link, address, route) is left in place on exit; the next
//! start reconciles it.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vlanet_overlayd::config::Config;
use vlanet_overlayd::netlink::{IpCommand, LinkOps, MockNetlink};
use vlanet_overlayd::{
    BackendDeps, BackendManager, Context, ExternalInterface, HttpSubnetManager, LinkRegistry,
    MockSubnetManager, SubnetManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        network = %config.network_name,
        iface = %config.iface,
        allocator_url = %config.allocator_url,
        dry_run = config.dry_run,
        "Starting vlanet overlay daemon"
    );

    let ops: Arc<dyn LinkOps> = if config.dry_run {
        warn!("Dry run: using in-memory kernel and allocator");
        let (mock, _) = MockNetlink::with_uplink(
            &config.iface,
            "192.0.2.10/24".parse().context("invalid dry run address")?,
        );
        Arc::new(mock)
    } else {
        Arc::new(IpCommand::with_binary(config.ip_binary.as_str()))
    };

    let ext_iface = ExternalInterface::lookup(ops.as_ref(), &config.iface, config.public_ip)
        .context("failed to resolve external interface")?;

    let subnet_mgr: Arc<dyn SubnetManager> = if config.dry_run {
        // skip the subnet holding the network address
        let subnet = config
            .network_config
            .nth_subnet(1)
            .context("network has no room for a host subnet")?;
        Arc::new(MockSubnetManager::granting(subnet))
    } else {
        Arc::new(HttpSubnetManager::new(
            &config.allocator_url,
            config.allocator_timeout,
        )?)
    };

    let manager = BackendManager::new(BackendDeps {
        subnet_mgr,
        ext_iface: Arc::new(ext_iface),
        ops,
        registry: LinkRegistry::new(),
    });
    let backend = manager.get_backend(&config.backend_type()?)?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = Context::from_shutdown(shutdown_rx);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    let network = match backend
        .register_network(&ctx, &config.network_name, &config.network_config)
        .await
    {
        Ok(network) => network,
        Err(e) if e.is_cancellation() => {
            info!(error = %e, "Shutdown during network registration");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, network = %config.network_name, "Failed to register network");
            return Err(e.into());
        }
    };

    info!(
        network = %network.name(),
        subnet = %network.lease().subnet,
        mtu = network.mtu(),
        "Network ready"
    );

    tokio::join!(backend.run(&ctx), network.run(&ctx));

    info!("Overlay daemon shutdown complete");
    Ok(())
}
