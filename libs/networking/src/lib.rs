//! Networking primitives for the overlay.
//!
//! This library provides helpers for:
//! - IPv4 prefixes (overlay networks, per-host subnets, host-scoped addresses)
//! - Link-layer hardware addresses
//! - VLAN tag and interface name validation
//! - MTU helpers

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Invalid hardware address.
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddr(String),

    /// VLAN tag outside the 802.1Q range.
    #[error("invalid VLAN id: {value} (must be between {min} and {max})")]
    InvalidVlanId { value: i64, min: u16, max: u16 },

    /// Interface name the kernel would reject.
    #[error("invalid interface name {name:?}: {reason}")]
    InvalidLinkName { name: String, reason: &'static str },

    /// Invalid MTU value.
    #[error("invalid MTU: {value} (must be between {min} and {max})")]
    InvalidMtu { value: u32, min: u32, max: u32 },
}

// ============================================================================
// IPv4 prefixes
// ============================================================================

/// Host prefix length for IPv4.
pub const IPV4_HOST_PREFIX_LEN: u8 = 32;

/// An IPv4 address together with a prefix length.
///
/// Unlike a strict network prefix the address is kept as given, so the same
/// type carries both "10.1.2.0/16" (an overlay address scoped to the whole
/// network) and "10.1.0.0/16" (the network itself, see [`Ipv4Net::network`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Net {
    /// Address.
    pub address: Ipv4Addr,

    /// Prefix length (e.g., 24 for /24).
    pub prefix_len: u8,
}

impl Ipv4Net {
    /// Create a new prefix.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > IPV4_HOST_PREFIX_LEN {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }

        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "10.1.0.0/16").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// The same address with a different prefix length.
    pub fn with_prefix_len(&self, prefix_len: u8) -> Result<Self, NetworkError> {
        Self::new(self.address, prefix_len)
    }

    /// The same address with the narrowest prefix (/32).
    ///
    /// An address assigned this way implies no on-link segment, so the kernel
    /// creates no subnet or broadcast route for it.
    pub fn host_scoped(&self) -> Self {
        Self {
            address: self.address,
            prefix_len: IPV4_HOST_PREFIX_LEN,
        }
    }

    /// The network this address belongs to (host bits cleared).
    pub fn network(&self) -> Self {
        Self {
            address: mask_ipv4(self.address, self.prefix_len),
            prefix_len: self.prefix_len,
        }
    }

    /// Netmask for the prefix length.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask(self.prefix_len))
    }

    /// Check if an address is within this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == mask_ipv4(self.address, self.prefix_len)
    }

    /// Number of addresses in this prefix.
    pub fn size(&self) -> u64 {
        1u64 << (IPV4_HOST_PREFIX_LEN - self.prefix_len)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Net {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

impl Serialize for Ipv4Net {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Net {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_cidr(&s).map_err(serde::de::Error::custom)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= IPV4_HOST_PREFIX_LEN {
        u32::MAX
    } else {
        u32::MAX << (IPV4_HOST_PREFIX_LEN - prefix_len)
    }
}

/// Mask an IPv4 address to a prefix length.
fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & prefix_mask(prefix_len))
}

// ============================================================================
// Hardware addresses
// ============================================================================

/// Ethernet hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareAddr([u8; 6]);

impl HardwareAddr {
    /// Create from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered unicast address derived from a seed.
    ///
    /// Used by the in-memory kernel to hand out stable, distinct addresses.
    pub fn local_from_seed(seed: u32) -> Self {
        let b = seed.to_be_bytes();
        Self([0x02, 0x42, b[0], b[1], b[2], b[3]])
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for HardwareAddr {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| NetworkError::InvalidHardwareAddr(s.to_string()))?;
            if part.len() != 2 {
                return Err(NetworkError::InvalidHardwareAddr(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| NetworkError::InvalidHardwareAddr(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(NetworkError::InvalidHardwareAddr(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// VLAN and link naming
// ============================================================================

/// Lowest usable 802.1Q VLAN id.
pub const VLAN_ID_MIN: u16 = 1;

/// Highest usable 802.1Q VLAN id (4095 is reserved).
pub const VLAN_ID_MAX: u16 = 4094;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const LINK_NAME_MAX_LEN: usize = 15;

/// Validate a VLAN id.
pub fn validate_vlan_id(value: i64) -> Result<u16, NetworkError> {
    if value < i64::from(VLAN_ID_MIN) || value > i64::from(VLAN_ID_MAX) {
        return Err(NetworkError::InvalidVlanId {
            value,
            min: VLAN_ID_MIN,
            max: VLAN_ID_MAX,
        });
    }
    Ok(value as u16)
}

/// Validate an interface name.
pub fn validate_link_name(name: &str) -> Result<(), NetworkError> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > LINK_NAME_MAX_LEN {
        "longer than 15 bytes"
    } else if name.contains(['/', ' ']) || name.chars().any(char::is_control) {
        "contains '/', whitespace or control characters"
    } else {
        return Ok(());
    };

    Err(NetworkError::InvalidLinkName {
        name: name.to_string(),
        reason,
    })
}

// ============================================================================
// MTU Configuration
// ============================================================================

/// Minimum MTU for IPv4.
pub const MTU_MIN_IPV4: u32 = 68;

/// Maximum MTU for jumbo frames.
pub const MTU_MAX_JUMBO: u32 = 9000;

/// Default MTU for Ethernet.
pub const MTU_DEFAULT_ETHERNET: u32 = 1500;

/// Validate an MTU value.
pub fn validate_mtu(mtu: u32) -> Result<u32, NetworkError> {
    if !(MTU_MIN_IPV4..=MTU_MAX_JUMBO).contains(&mtu) {
        return Err(NetworkError::InvalidMtu {
            value: mtu,
            min: MTU_MIN_IPV4,
            max: MTU_MAX_JUMBO,
        });
    }
    Ok(mtu)
}
