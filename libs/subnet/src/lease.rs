//! Lease and lease attribute types.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vlanet_networking::Ipv4Net;

use crate::error::SubnetError;

/// Attributes a host advertises with its lease request.
///
/// `backend_data` is opaque to the allocator; each backend defines its own
/// payload and other hosts' backends decode it when they learn of the lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseAttrs {
    /// Address other hosts use to reach this one.
    #[serde(rename = "PublicIP")]
    pub public_ip: Ipv4Addr,

    /// Backend that produced this lease request (e.g. "vlan").
    #[serde(rename = "BackendType", default)]
    pub backend_type: String,

    /// Backend-specific payload.
    #[serde(rename = "BackendData", default, skip_serializing_if = "Value::is_null")]
    pub backend_data: Value,
}

impl LeaseAttrs {
    /// Build attributes carrying a serializable backend payload.
    pub fn new<T: Serialize>(
        public_ip: Ipv4Addr,
        backend_type: &str,
        backend_data: &T,
    ) -> Result<Self, SubnetError> {
        Ok(Self {
            public_ip,
            backend_type: backend_type.to_string(),
            backend_data: serde_json::to_value(backend_data)?,
        })
    }

    /// Decode the backend payload.
    pub fn decode_backend_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, SubnetError> {
        Ok(serde_json::from_value(self.backend_data.clone())?)
    }
}

/// A subnet lease granted to this host by the allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Per-host subnet (e.g. 10.1.2.0/24).
    #[serde(rename = "Subnet")]
    pub subnet: Ipv4Net,

    /// Attributes the lease was granted with.
    #[serde(rename = "Attrs")]
    pub attrs: LeaseAttrs,

    /// When the lease runs out, if the allocator bounds it in time.
    #[serde(rename = "Expiration", default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl Lease {
    /// Check whether the lease has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }

    /// Check whether the lease has already expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        #[serde(rename = "VtepMAC")]
        vtep_mac: String,
    }

    #[test]
    fn test_lease_attrs_wire_format() {
        let attrs = LeaseAttrs::new(
            Ipv4Addr::new(10, 0, 0, 5),
            "vlan",
            &Payload {
                vtep_mac: "02:42:00:00:00:01".to_string(),
            },
        )
        .unwrap();

        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["PublicIP"], "10.0.0.5");
        assert_eq!(json["BackendType"], "vlan");
        assert_eq!(json["BackendData"]["VtepMAC"], "02:42:00:00:00:01");

        let payload: Payload = attrs.decode_backend_data().unwrap();
        assert_eq!(payload.vtep_mac, "02:42:00:00:00:01");
    }

    #[test]
    fn test_lease_from_allocator_response() {
        let lease: Lease = serde_json::from_str(
            r#"{
                "Subnet": "10.1.2.0/24",
                "Attrs": {"PublicIP": "10.0.0.5", "BackendType": "vlan"},
                "Expiration": "2026-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(lease.subnet.to_string(), "10.1.2.0/24");
        assert!(lease.attrs.backend_data.is_null());

        let before: DateTime<Utc> = "2025-12-31T23:59:59Z".parse().unwrap();
        let after: DateTime<Utc> = "2026-01-01T00:00:01Z".parse().unwrap();
        assert!(!lease.is_expired_at(before));
        assert!(lease.is_expired_at(after));
        assert!(lease.is_expired());
    }

    #[test]
    fn test_lease_without_expiration_never_expires() {
        let lease = Lease {
            subnet: "10.1.2.0/24".parse().unwrap(),
            attrs: LeaseAttrs {
                public_ip: Ipv4Addr::new(10, 0, 0, 5),
                backend_type: "vlan".to_string(),
                backend_data: Value::Null,
            },
            expiration: None,
        };
        assert!(!lease.is_expired());
    }
}
