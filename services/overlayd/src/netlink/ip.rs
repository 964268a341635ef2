//! [`LinkOps`] over the iproute2 `ip` tool.
//!
//! Queries use JSON output (`ip -j -d ...`); mutations map the tool's
//! `RTNETLINK answers: File exists` onto [`NetlinkError::AlreadyExists`].

use std::process::Command;

use serde::Deserialize;
use tracing::debug;
use vlanet_networking::{HardwareAddr, Ipv4Net};

use super::{Link, LinkKind, LinkOps, LinkSpec, NetlinkError, Route};

/// Runs `ip` to configure links.
#[derive(Debug, Clone)]
pub struct IpCommand {
    /// Path or name of the `ip` binary.
    binary: String,
}

impl IpCommand {
    /// Use `ip` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: "ip".to_string(),
        }
    }

    /// Use a specific `ip` binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run an `ip` command and return its stdout.
    fn run_ip(&self, args: &[&str]) -> Result<Vec<u8>, NetlinkError> {
        debug!(args = %args.join(" "), "Running ip");

        let output = Command::new(&self.binary).args(args).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(args, stderr.trim()));
        }

        Ok(output.stdout)
    }

    fn show_links(&self, dev: Option<&str>) -> Result<Vec<Link>, NetlinkError> {
        let mut args = vec!["-j", "-d", "link", "show"];
        if let Some(dev) = dev {
            args.extend(["dev", dev]);
        }
        let stdout = self.run_ip(&args)?;
        parse_links(&stdout)
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkOps for IpCommand {
    fn link_add(&self, spec: &LinkSpec) -> Result<u32, NetlinkError> {
        let parent = self.link_by_index(spec.parent_index)?;
        let vlan_id = spec.vlan_id.to_string();

        let stdout = self.run_ip(&[
            "-echo", "-j", "link", "add", "link", &parent.name, "name", &spec.name, "type",
            "vlan", "id", &vlan_id,
        ])?;

        // the echoed RTM_NEWLINK carries the new index; fall back to a name
        // lookup when the build prints nothing
        match parse_echoed_index(&stdout) {
            Some(index) => Ok(index),
            None => {
                debug!(link = %spec.name, "ip did not echo the new link; looking it up by name");
                Ok(self.link_by_name(&spec.name)?.index)
            }
        }
    }

    fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        self.show_links(Some(name))?
            .into_iter()
            .next()
            .ok_or_else(|| NetlinkError::NotFound(format!("link {}", name)))
    }

    fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        self.show_links(None)?
            .into_iter()
            .find(|link| link.index == index)
            .ok_or_else(|| NetlinkError::NotFound(format!("link with index {}", index)))
    }

    fn link_del(&self, link: &Link) -> Result<(), NetlinkError> {
        self.run_ip(&["link", "del", "dev", &link.name]).map(drop)
    }

    fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError> {
        self.run_ip(&["link", "set", "dev", &link.name, "up"])
            .map(drop)
    }

    fn addr_list_v4(&self, link: &Link) -> Result<Vec<Ipv4Net>, NetlinkError> {
        let stdout = self.run_ip(&["-j", "-4", "addr", "show", "dev", &link.name])?;
        parse_addrs(&stdout)
    }

    fn addr_add(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError> {
        let addr = addr.to_string();
        self.run_ip(&["-4", "addr", "add", &addr, "dev", &link.name])
            .map(drop)
    }

    fn addr_del(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError> {
        let addr = addr.to_string();
        self.run_ip(&["-4", "addr", "del", &addr, "dev", &link.name])
            .map(drop)
    }

    fn route_add(&self, route: &Route) -> Result<(), NetlinkError> {
        let link = self.link_by_index(route.link_index)?;
        let args = route_add_args(route, &link.name);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_ip(&args).map(drop)
    }
}

/// Build `ip route add` arguments.
fn route_add_args(route: &Route, dev: &str) -> Vec<String> {
    let mut args = vec![
        "-4".to_string(),
        "route".to_string(),
        "add".to_string(),
        route.dst.to_string(),
    ];
    if let Some(gw) = route.gateway {
        args.extend(["via".to_string(), gw.to_string()]);
    }
    args.extend([
        "dev".to_string(),
        dev.to_string(),
        "scope".to_string(),
        route.scope.as_str().to_string(),
    ]);
    if route.gateway.is_some() {
        args.push("onlink".to_string());
    }
    args
}

/// Map a failed `ip` invocation onto an error kind.
fn classify_failure(args: &[&str], stderr: &str) -> NetlinkError {
    let op = format!("ip {}", args.join(" "));

    if stderr.contains("File exists") {
        NetlinkError::AlreadyExists(op)
    } else if stderr.contains("Cannot find device")
        || stderr.contains("does not exist")
        || stderr.contains("No such device")
    {
        NetlinkError::NotFound(op)
    } else {
        NetlinkError::Failed {
            op,
            detail: stderr.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    mtu: u32,
    #[serde(default)]
    link_index: Option<u32>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfo>,
}

/// The part of an echoed `RTM_NEWLINK` we need.
#[derive(Debug, Deserialize)]
struct IpEchoLink {
    ifindex: u32,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<IpVlanInfo>,
}

#[derive(Debug, Deserialize)]
struct IpVlanInfo {
    // vxlan reports its VNI under the same key
    #[serde(default)]
    id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    local: String,
    prefixlen: u8,
}

fn parse_links(stdout: &[u8]) -> Result<Vec<Link>, NetlinkError> {
    let entries: Vec<IpLink> = serde_json::from_slice(stdout).map_err(|e| NetlinkError::Parse {
        op: "ip -j link show".to_string(),
        detail: e.to_string(),
    })?;

    entries.into_iter().map(into_link).collect()
}

fn parse_echoed_index(stdout: &[u8]) -> Option<u32> {
    serde_json::from_slice::<Vec<IpEchoLink>>(stdout)
        .ok()?
        .first()
        .map(|link| link.ifindex)
}

fn into_link(entry: IpLink) -> Result<Link, NetlinkError> {
    let hardware_addr = match entry.address.as_deref() {
        // non-ethernet links (lo, tun) report other address formats
        Some(addr) => addr.parse().unwrap_or_default(),
        None => HardwareAddr::default(),
    };

    let kind = LinkKind::from_info_kind(
        entry
            .linkinfo
            .as_ref()
            .and_then(|info| info.info_kind.as_deref()),
    );

    let vlan_id = match kind {
        LinkKind::Vlan => {
            let id = entry
                .linkinfo
                .as_ref()
                .and_then(|info| info.info_data.as_ref())
                .and_then(|data| data.id)
                .and_then(|id| u16::try_from(id).ok());
            if id.is_none() {
                return Err(NetlinkError::Parse {
                    op: "ip -j -d link show".to_string(),
                    detail: format!("vlan link {} has no id", entry.ifname),
                });
            }
            id
        }
        _ => None,
    };

    Ok(Link {
        index: entry.ifindex,
        up: entry.flags.iter().any(|f| f == "UP"),
        name: entry.ifname,
        kind,
        vlan_id,
        parent_index: entry.link_index,
        hardware_addr,
        mtu: entry.mtu,
    })
}

fn parse_addrs(stdout: &[u8]) -> Result<Vec<Ipv4Net>, NetlinkError> {
    let parse_err = |detail: String| NetlinkError::Parse {
        op: "ip -j -4 addr show".to_string(),
        detail,
    };

    let entries: Vec<IpAddrEntry> =
        serde_json::from_slice(stdout).map_err(|e| parse_err(e.to_string()))?;

    entries
        .into_iter()
        .flat_map(|entry| entry.addr_info)
        .filter(|info| info.family == "inet")
        .map(|info| {
            let address = info
                .local
                .parse()
                .map_err(|_| parse_err(format!("bad address {}", info.local)))?;
            Ipv4Net::new(address, info.prefixlen).map_err(|e| parse_err(e.to_string()))
        })
        .collect()
}
