//! In-memory kernel for tests and dry runs.
//!
//! Models the parts of rtnetlink behavior the overlay depends on:
//! EEXIST on duplicate links, addresses and routes; routes vanish with their
//! link; routes cannot be added through a link that is down.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use vlanet_networking::{HardwareAddr, Ipv4Net, MTU_DEFAULT_ETHERNET};

use super::{Link, LinkKind, LinkOps, LinkSpec, NetlinkError, Route};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    LinkAdd,
    LinkByName,
    LinkByIndex,
    LinkDel,
    LinkSetUp,
    AddrList,
    AddrAdd,
    AddrDel,
    RouteAdd,
}

#[derive(Debug)]
struct MockLink {
    link: Link,
    addrs: Vec<Ipv4Net>,
}

#[derive(Debug, Default)]
struct State {
    links: BTreeMap<u32, MockLink>,
    routes: Vec<Route>,
    next_index: u32,
    failing: HashSet<MockOp>,
    /// Remaining link_add calls let through before failing.
    fail_link_add_after: Option<u32>,
    index_lookup_kind: Option<LinkKind>,
    link_adds: u32,
    link_dels: u32,
}

/// In-memory [`LinkOps`] implementation.
#[derive(Debug)]
pub struct MockNetlink {
    state: Mutex<State>,
}

impl MockNetlink {
    /// Create a kernel with only a loopback device.
    pub fn new() -> Self {
        let mock = Self {
            state: Mutex::new(State {
                next_index: 1,
                ..State::default()
            }),
        };
        mock.insert_link("lo", LinkKind::Device, None, None, 65536);
        mock
    }

    /// Create a kernel with a physical uplink carrying `addr`.
    ///
    /// Returns the kernel and the uplink's index.
    pub fn with_uplink(name: &str, addr: Ipv4Net) -> (Self, u32) {
        let mock = Self::new();
        let index = mock.insert_link(name, LinkKind::Device, None, None, MTU_DEFAULT_ETHERNET);
        let mut state = mock.state();
        if let Some(entry) = state.links.get_mut(&index) {
            entry.link.up = true;
            entry.addrs.push(addr);
        }
        drop(state);
        (mock, index)
    }

    /// Add a link as if left behind by an earlier run or another tool.
    pub fn add_existing_link(&self, name: &str, kind: LinkKind, vlan_id: Option<u16>) -> u32 {
        self.insert_link(name, kind, vlan_id, None, MTU_DEFAULT_ETHERNET)
    }

    /// Add an address directly, bypassing EEXIST checks.
    pub fn add_existing_addr(&self, name: &str, addr: Ipv4Net) {
        let mut state = self.state();
        if let Some(entry) = state.links.values_mut().find(|l| l.link.name == name) {
            entry.addrs.push(addr);
        }
    }

    /// Add a route as if installed by other host tooling.
    pub fn add_existing_route(&self, route: Route) {
        self.state().routes.push(route);
    }

    /// Make every call of `op` fail until [`MockNetlink::clear_failures`].
    pub fn fail(&self, op: MockOp) {
        self.state().failing.insert(op);
    }

    /// Let `link_add` through `n` more times, then fail every call.
    pub fn fail_link_add_after(&self, n: u32) {
        self.state().fail_link_add_after = Some(n);
    }

    /// Report `kind` for every lookup by index.
    pub fn misreport_kind_by_index(&self, kind: LinkKind) {
        self.state().index_lookup_kind = Some(kind);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing.clear();
        state.fail_link_add_after = None;
        state.index_lookup_kind = None;
    }

    /// Current view of a link.
    pub fn link(&self, name: &str) -> Option<Link> {
        self.state()
            .links
            .values()
            .find(|l| l.link.name == name)
            .map(|l| l.link.clone())
    }

    /// Addresses on a link.
    pub fn addrs(&self, name: &str) -> Vec<Ipv4Net> {
        self.state()
            .links
            .values()
            .find(|l| l.link.name == name)
            .map(|l| l.addrs.clone())
            .unwrap_or_default()
    }

    /// All routes.
    pub fn routes(&self) -> Vec<Route> {
        self.state().routes.clone()
    }

    /// Number of links, loopback included.
    pub fn link_count(&self) -> usize {
        self.state().links.len()
    }

    /// Number of successful link creations.
    pub fn link_add_count(&self) -> u32 {
        self.state().link_adds
    }

    /// Number of successful link deletions.
    pub fn link_del_count(&self) -> u32 {
        self.state().link_dels
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_link(
        &self,
        name: &str,
        kind: LinkKind,
        vlan_id: Option<u16>,
        parent_index: Option<u32>,
        mtu: u32,
    ) -> u32 {
        let mut state = self.state();
        let index = state.next_index;
        state.next_index += 1;
        state.links.insert(
            index,
            MockLink {
                link: Link {
                    index,
                    name: name.to_string(),
                    kind,
                    vlan_id,
                    parent_index,
                    hardware_addr: HardwareAddr::local_from_seed(index),
                    mtu,
                    up: false,
                },
                addrs: Vec::new(),
            },
        );
        index
    }
}

impl Default for MockNetlink {
    fn default() -> Self {
        Self::new()
    }
}

fn check(state: &State, op: MockOp) -> Result<(), NetlinkError> {
    if state.failing.contains(&op) {
        return Err(NetlinkError::Failed {
            op: format!("{:?}", op),
            detail: "injected failure".to_string(),
        });
    }
    Ok(())
}

fn entry_mut<'a>(state: &'a mut State, link: &Link) -> Result<&'a mut MockLink, NetlinkError> {
    state
        .links
        .get_mut(&link.index)
        .ok_or_else(|| NetlinkError::NotFound(format!("link {}", link.name)))
}

impl LinkOps for MockNetlink {
    fn link_add(&self, spec: &LinkSpec) -> Result<u32, NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::LinkAdd)?;

        if let Some(remaining) = state.fail_link_add_after.as_mut() {
            if *remaining == 0 {
                return Err(NetlinkError::Failed {
                    op: "LinkAdd".to_string(),
                    detail: "injected failure".to_string(),
                });
            }
            *remaining -= 1;
        }

        if state.links.values().any(|l| l.link.name == spec.name) {
            return Err(NetlinkError::AlreadyExists(format!("link {}", spec.name)));
        }

        let Some(parent) = state.links.get(&spec.parent_index) else {
            return Err(NetlinkError::NotFound(format!(
                "link with index {}",
                spec.parent_index
            )));
        };
        let mtu = parent.link.mtu;

        state.link_adds += 1;
        drop(state);

        let index = self.insert_link(
            &spec.name,
            LinkKind::Vlan,
            Some(spec.vlan_id),
            Some(spec.parent_index),
            mtu,
        );
        debug!(link = %spec.name, index, vlan_id = spec.vlan_id, "[MOCK] Link added");
        Ok(index)
    }

    fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        let state = self.state();
        check(&state, MockOp::LinkByName)?;
        state
            .links
            .values()
            .find(|l| l.link.name == name)
            .map(|l| l.link.clone())
            .ok_or_else(|| NetlinkError::NotFound(format!("link {}", name)))
    }

    fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        let state = self.state();
        check(&state, MockOp::LinkByIndex)?;
        let mut link = state
            .links
            .get(&index)
            .map(|l| l.link.clone())
            .ok_or_else(|| NetlinkError::NotFound(format!("link with index {}", index)))?;
        if let Some(kind) = &state.index_lookup_kind {
            link.kind = kind.clone();
        }
        Ok(link)
    }

    fn link_del(&self, link: &Link) -> Result<(), NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::LinkDel)?;
        if state.links.remove(&link.index).is_none() {
            return Err(NetlinkError::NotFound(format!("link {}", link.name)));
        }
        state.routes.retain(|r| r.link_index != link.index);
        state.link_dels += 1;
        debug!(link = %link.name, index = link.index, "[MOCK] Link deleted");
        Ok(())
    }

    fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::LinkSetUp)?;
        entry_mut(&mut state, link)?.link.up = true;
        Ok(())
    }

    fn addr_list_v4(&self, link: &Link) -> Result<Vec<Ipv4Net>, NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::AddrList)?;
        Ok(entry_mut(&mut state, link)?.addrs.clone())
    }

    fn addr_add(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::AddrAdd)?;
        let entry = entry_mut(&mut state, link)?;
        if entry.addrs.iter().any(|a| a.address == addr.address) {
            return Err(NetlinkError::AlreadyExists(format!(
                "address {} on {}",
                addr, link.name
            )));
        }
        entry.addrs.push(addr);
        Ok(())
    }

    fn addr_del(&self, link: &Link, addr: Ipv4Net) -> Result<(), NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::AddrDel)?;
        let entry = entry_mut(&mut state, link)?;
        let before = entry.addrs.len();
        entry.addrs.retain(|a| *a != addr);
        if entry.addrs.len() == before {
            return Err(NetlinkError::NotFound(format!(
                "address {} on {}",
                addr, link.name
            )));
        }
        Ok(())
    }

    fn route_add(&self, route: &Route) -> Result<(), NetlinkError> {
        let mut state = self.state();
        check(&state, MockOp::RouteAdd)?;

        let Some(entry) = state.links.get(&route.link_index) else {
            return Err(NetlinkError::NotFound(format!(
                "link with index {}",
                route.link_index
            )));
        };
        if !entry.link.up {
            return Err(NetlinkError::Failed {
                op: format!("route add {}", route),
                detail: "Network is down".to_string(),
            });
        }
        if route.gateway.is_none() && entry.addrs.is_empty() {
            return Err(NetlinkError::Failed {
                op: format!("route add {}", route),
                detail: "no usable source address".to_string(),
            });
        }

        // the kernel keys routes by destination within the main table
        if state.routes.iter().any(|r| r.dst == route.dst) {
            return Err(NetlinkError::AlreadyExists(format!("route {}", route.dst)));
        }

        state.routes.push(route.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::RouteScope;

    fn uplink() -> (MockNetlink, u32) {
        MockNetlink::with_uplink("eth0", "10.0.0.5/24".parse().unwrap())
    }

    #[test]
    fn test_link_add_assigns_index_and_mac() {
        let (mock, parent) = uplink();
        let index = mock.link_add(&LinkSpec::vlan("vlanet.42", 42, parent)).unwrap();

        let link = mock.link_by_index(index).unwrap();
        assert_eq!(link.name, "vlanet.42");
        assert_eq!(link.kind, LinkKind::Vlan);
        assert_eq!(link.vlan_id, Some(42));
        assert_eq!(link.parent_index, Some(parent));
        assert_ne!(link.hardware_addr, HardwareAddr::default());
        assert!(!link.up);
    }

    #[test]
    fn test_link_add_duplicate_name() {
        let (mock, parent) = uplink();
        mock.link_add(&LinkSpec::vlan("vlanet.42", 42, parent)).unwrap();

        let err = mock
            .link_add(&LinkSpec::vlan("vlanet.42", 7, parent))
            .unwrap_err();
        assert!(err.is_exists());
    }

    #[test]
    fn test_link_add_missing_parent() {
        let mock = MockNetlink::new();
        let err = mock.link_add(&LinkSpec::vlan("vlanet.42", 42, 99)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_link_del_drops_routes() {
        let (mock, parent) = uplink();
        let index = mock.link_add(&LinkSpec::vlan("vlanet.42", 42, parent)).unwrap();
        let link = mock.link_by_index(index).unwrap();
        mock.link_set_up(&link).unwrap();
        mock.addr_add(&link, "10.1.2.0/32".parse().unwrap()).unwrap();
        mock.route_add(&Route {
            link_index: index,
            dst: "10.1.0.0/16".parse().unwrap(),
            gateway: None,
            scope: RouteScope::Universe,
        })
        .unwrap();

        mock.link_del(&link).unwrap();
        assert!(mock.routes().is_empty());
        assert!(mock.link("vlanet.42").is_none());
    }

    #[test]
    fn test_route_requires_up_link() {
        let (mock, parent) = uplink();
        let index = mock.link_add(&LinkSpec::vlan("vlanet.42", 42, parent)).unwrap();
        let link = mock.link_by_index(index).unwrap();
        mock.addr_add(&link, "10.1.2.0/32".parse().unwrap()).unwrap();

        let route = Route {
            link_index: index,
            dst: "10.1.0.0/16".parse().unwrap(),
            gateway: None,
            scope: RouteScope::Universe,
        };
        assert!(matches!(
            mock.route_add(&route),
            Err(NetlinkError::Failed { .. })
        ));

        mock.link_set_up(&link).unwrap();
        mock.route_add(&route).unwrap();
        assert!(mock.route_add(&route).unwrap_err().is_exists());
    }

    #[test]
    fn test_injected_failures() {
        let (mock, parent) = uplink();
        mock.fail(MockOp::LinkAdd);
        assert!(mock.link_add(&LinkSpec::vlan("vlanet.42", 42, parent)).is_err());

        mock.clear_failures();
        mock.fail_link_add_after(1);
        assert!(mock.link_add(&LinkSpec::vlan("vlanet.1", 1, parent)).is_ok());
        assert!(mock.link_add(&LinkSpec::vlan("vlanet.2", 2, parent)).is_err());
        assert_eq!(mock.link_add_count(), 1);
    }
}
