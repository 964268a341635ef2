//! Per-network configuration handed to backends by the daemon.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vlanet_networking::Ipv4Net;

use crate::error::SubnetError;

/// Backend type assumed when the `Backend` section omits `Type`.
pub const DEFAULT_BACKEND_TYPE: &str = "vlan";

/// Default per-host subnet length.
pub const DEFAULT_SUBNET_LEN: u8 = 24;

/// Network configuration (e.g. the contents of `net-conf.json`).
///
/// ```json
/// {"Network": "10.1.0.0/16", "Backend": {"Type": "vlan", "VlanId": 42}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Overlay network spanning all hosts.
    #[serde(rename = "Network")]
    pub network: Ipv4Net,

    /// Length of the per-host subnets carved from `network`.
    #[serde(rename = "SubnetLen", default, skip_serializing_if = "Option::is_none")]
    pub subnet_len: Option<u8>,

    /// Backend-specific section, kept opaque until a backend decodes it.
    #[serde(rename = "Backend", default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Value>,
}

/// The `Type` discriminator of the backend section.
#[derive(Debug, Deserialize)]
pub struct BackendSection {
    #[serde(rename = "Type", alias = "type", default)]
    pub backend_type: Option<String>,
}

impl NetworkConfig {
    /// Create a configuration for a network with no backend section.
    pub fn new(network: Ipv4Net) -> Self {
        Self {
            network,
            subnet_len: None,
            backend: None,
        }
    }

    /// Attach a backend section.
    pub fn with_backend(mut self, backend: Value) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Decode and validate a configuration from JSON.
    pub fn from_json(s: &str) -> Result<Self, SubnetError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the prefix lengths are usable.
    pub fn validate(&self) -> Result<(), SubnetError> {
        if self.network.prefix_len > 30 {
            return Err(SubnetError::InvalidConfig(format!(
                "network {} is too small for an overlay",
                self.network
            )));
        }

        let subnet_len = self.subnet_len();
        if subnet_len <= self.network.prefix_len || subnet_len > 30 {
            return Err(SubnetError::InvalidConfig(format!(
                "SubnetLen {} must be longer than the network prefix /{} and at most 30",
                subnet_len, self.network.prefix_len
            )));
        }

        Ok(())
    }

    /// Per-host subnet length.
    pub fn subnet_len(&self) -> u8 {
        self.subnet_len.unwrap_or(DEFAULT_SUBNET_LEN)
    }

    /// The `n`th per-host subnet of the network, if the network has one.
    pub fn nth_subnet(&self, n: u32) -> Option<Ipv4Net> {
        let subnet_len = self.subnet_len();
        if subnet_len > 32 {
            return None;
        }
        let bits = subnet_len.checked_sub(self.network.prefix_len)?;
        if u64::from(n) >= 1u64 << bits {
            return None;
        }

        let base = u32::from(self.network.network().address);
        let offset = n << (32 - u32::from(subnet_len));
        Some(Ipv4Net {
            address: (base + offset).into(),
            prefix_len: subnet_len,
        })
    }

    /// Backend type named by the backend section.
    pub fn backend_type(&self) -> Result<String, SubnetError> {
        let Some(backend) = &self.backend else {
            return Ok(DEFAULT_BACKEND_TYPE.to_string());
        };

        let section: BackendSection = serde_json::from_value(backend.clone())
            .map_err(|e| SubnetError::InvalidConfig(format!("Backend: {}", e)))?;

        Ok(section
            .backend_type
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| DEFAULT_BACKEND_TYPE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_network_config() {
        let config = NetworkConfig::from_json(
            r#"{"Network": "10.1.0.0/16", "Backend": {"Type": "vlan", "VlanId": 42}}"#,
        )
        .unwrap();

        assert_eq!(config.network.to_string(), "10.1.0.0/16");
        assert_eq!(config.subnet_len(), 24);
        assert_eq!(config.backend_type().unwrap(), "vlan");
        assert_eq!(config.backend.unwrap()["VlanId"], 42);
    }

    #[rstest]
    #[case(r#"{"Network": "10.1.0.0/16"}"#, "vlan")]
    #[case(r#"{"Network": "10.1.0.0/16", "Backend": {}}"#, "vlan")]
    #[case(r#"{"Network": "10.1.0.0/16", "Backend": {"Type": ""}}"#, "vlan")]
    #[case(r#"{"Network": "10.1.0.0/16", "Backend": {"Type": "VXLAN"}}"#, "vxlan")]
    fn test_backend_type(#[case] json: &str, #[case] expected: &str) {
        let config = NetworkConfig::from_json(json).unwrap();
        assert_eq!(config.backend_type().unwrap(), expected);
    }

    #[rstest]
    #[case(r#"{"Network": "10.1.0.0"}"#)]
    #[case(r#"{"Network": "10.1.0.0/31"}"#)]
    #[case(r#"{"Network": "10.1.0.0/16", "SubnetLen": 16}"#)]
    #[case(r#"{"Network": "10.1.0.0/16", "SubnetLen": 31}"#)]
    #[case(r#"{"Backend": {"Type": "vlan"}}"#)]
    fn test_invalid_network_config(#[case] json: &str) {
        assert!(NetworkConfig::from_json(json).is_err());
    }

    #[test]
    fn test_nth_subnet() {
        let config = NetworkConfig::from_json(r#"{"Network": "10.1.0.0/16"}"#).unwrap();
        assert_eq!(config.nth_subnet(0).unwrap().to_string(), "10.1.0.0/24");
        assert_eq!(config.nth_subnet(2).unwrap().to_string(), "10.1.2.0/24");
        assert_eq!(config.nth_subnet(255).unwrap().to_string(), "10.1.255.0/24");
        assert_eq!(config.nth_subnet(256), None);
    }

    #[test]
    fn test_backend_type_must_be_string() {
        let config = NetworkConfig::new("10.1.0.0/16".parse().unwrap())
            .with_backend(serde_json::json!({"Type": 7}));
        assert!(config.backend_type().is_err());
    }
}
