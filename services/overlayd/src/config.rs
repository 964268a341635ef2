//! Configuration for the overlay daemon.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use vlanet_subnet::NetworkConfig;

/// Default location of the network configuration file.
pub const DEFAULT_NETWORK_CONFIG_FILE: &str = "/etc/vlanet/net-conf.json";

/// Overlay daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Overlay network to join.
    pub network_name: String,

    /// Parsed network configuration.
    pub network_config: NetworkConfig,

    /// External interface the VLAN is stacked on.
    pub iface: String,

    /// Address advertised to other hosts instead of the interface address.
    pub public_ip: Option<Ipv4Addr>,

    /// Lease allocator base URL.
    pub allocator_url: String,

    /// Per-request allocator timeout.
    pub allocator_timeout: Duration,

    /// `ip` binary used to configure the kernel.
    pub ip_binary: String,

    /// Use the in-memory kernel and allocator instead of the host.
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` (an environment stand-in).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network_name =
            lookup("VLANET_NETWORK_NAME").unwrap_or_else(|| "default".to_string());

        let network_config = match lookup("VLANET_NETWORK_CONFIG") {
            Some(inline) => NetworkConfig::from_json(&inline)
                .context("invalid VLANET_NETWORK_CONFIG")?,
            None => {
                let path = lookup("VLANET_NETWORK_CONFIG_FILE")
                    .unwrap_or_else(|| DEFAULT_NETWORK_CONFIG_FILE.to_string());
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read network config {}", path))?;
                NetworkConfig::from_json(&raw)
                    .with_context(|| format!("invalid network config {}", path))?
            }
        };

        let iface = lookup("VLANET_IFACE").context("VLANET_IFACE must be set")?;

        let public_ip = lookup("VLANET_PUBLIC_IP")
            .map(|s| s.parse::<Ipv4Addr>())
            .transpose()
            .context("invalid VLANET_PUBLIC_IP")?;

        let allocator_url = lookup("VLANET_ALLOCATOR_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());

        let allocator_timeout = lookup("VLANET_ALLOCATOR_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let ip_binary = lookup("VLANET_IP_BINARY").unwrap_or_else(|| "ip".to_string());

        let dry_run = lookup("VLANET_DRY_RUN")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let log_level = lookup("VLANET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            network_name,
            network_config,
            iface,
            public_ip,
            allocator_url,
            allocator_timeout,
            ip_binary,
            dry_run,
            log_level,
        })
    }

    /// Backend type named by the network configuration.
    pub fn backend_type(&self) -> Result<String> {
        Ok(self.network_config.backend_type()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const NET_CONF: &str = r#"{"Network": "10.1.0.0/16", "Backend": {"Type": "vlan", "VlanId": 42}}"#;

    #[test]
    fn test_defaults() {
        let config = load(&[
            ("VLANET_NETWORK_CONFIG", NET_CONF),
            ("VLANET_IFACE", "eth0"),
        ])
        .unwrap();

        assert_eq!(config.network_name, "default");
        assert_eq!(config.iface, "eth0");
        assert_eq!(config.public_ip, None);
        assert_eq!(config.allocator_url, "http://127.0.0.1:8080");
        assert_eq!(config.allocator_timeout, Duration::from_secs(30));
        assert_eq!(config.ip_binary, "ip");
        assert!(!config.dry_run);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.backend_type().unwrap(), "vlan");
        assert_eq!(config.network_config.network.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("VLANET_NETWORK_NAME", "prod"),
            ("VLANET_NETWORK_CONFIG", NET_CONF),
            ("VLANET_IFACE", "bond0"),
            ("VLANET_PUBLIC_IP", "203.0.113.9"),
            ("VLANET_ALLOCATOR_URL", "http://alloc:9000"),
            ("VLANET_ALLOCATOR_TIMEOUT_SECS", "5"),
            ("VLANET_IP_BINARY", "/usr/sbin/ip"),
            ("VLANET_DRY_RUN", "true"),
            ("VLANET_LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.network_name, "prod");
        assert_eq!(config.public_ip, Some(Ipv4Addr::new(203, 0, 113, 9)));
        assert_eq!(config.allocator_url, "http://alloc:9000");
        assert_eq!(config.allocator_timeout, Duration::from_secs(5));
        assert_eq!(config.ip_binary, "/usr/sbin/ip");
        assert!(config.dry_run);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_iface_required() {
        let err = load(&[("VLANET_NETWORK_CONFIG", NET_CONF)]).unwrap_err();
        assert!(err.to_string().contains("VLANET_IFACE"));
    }

    #[test]
    fn test_invalid_public_ip() {
        let err = load(&[
            ("VLANET_NETWORK_CONFIG", NET_CONF),
            ("VLANET_IFACE", "eth0"),
            ("VLANET_PUBLIC_IP", "not-an-ip"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("VLANET_PUBLIC_IP"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load(&[
            ("VLANET_NETWORK_CONFIG_FILE", "/nonexistent/net-conf.json"),
            ("VLANET_IFACE", "eth0"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/net-conf.json"));
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net-conf.json");
        std::fs::write(&path, NET_CONF).unwrap();

        let config = load(&[
            ("VLANET_NETWORK_CONFIG_FILE", path.to_str().unwrap()),
            ("VLANET_IFACE", "eth0"),
        ])
        .unwrap();
        assert_eq!(config.network_config.subnet_len(), 24);
    }
}
