//! VLAN link reconciliation.
//!
//! A crash or manual intervention can leave a link with the target name
//! behind. [`LinkReconciler::ensure`] keeps such a link when its identity
//! (kind, VLAN tag, name) matches the spec, and deletes and recreates it
//! otherwise. Addresses and routes are not part of the identity; they are
//! reconciled by [`super::VlanDevice::configure`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::DeviceError;
use crate::netlink::{Link, LinkKind, LinkOps, LinkSpec};

/// Ensures VLAN links exist with the requested identity.
#[derive(Clone)]
pub struct LinkReconciler {
    ops: Arc<dyn LinkOps>,
}

impl LinkReconciler {
    /// Create a reconciler over a link capability.
    pub fn new(ops: Arc<dyn LinkOps>) -> Self {
        Self { ops }
    }

    /// Make sure a link matching `spec` exists and return it.
    ///
    /// Not safe to run concurrently for the same name; callers hold a
    /// [`super::LinkClaim`] for `spec.name`.
    pub fn ensure(&self, spec: &LinkSpec) -> Result<Link, DeviceError> {
        let index = match self.ops.link_add(spec) {
            Ok(index) => index,
            Err(e) if e.is_exists() => {
                let existing = self.ops.link_by_name(&spec.name)?;

                let Some(incompat) = links_incompat(spec, &existing) else {
                    debug!(
                        link = %spec.name,
                        index = existing.index,
                        "Reusing existing vlan link"
                    );
                    return Ok(existing);
                };

                warn!(
                    link = %spec.name,
                    incompat = %incompat,
                    "Link already exists with incompatible configuration; recreating device"
                );

                self.ops
                    .link_del(&existing)
                    .map_err(|source| DeviceError::DeleteFailed {
                        name: spec.name.clone(),
                        source,
                    })?;

                self.ops
                    .link_add(spec)
                    .map_err(|source| DeviceError::CreateFailed {
                        name: spec.name.clone(),
                        source,
                    })?
            }
            Err(e) => return Err(e.into()),
        };

        // resolve by index: a name lookup could race with another rename
        let link = self
            .ops
            .link_by_index(index)
            .map_err(|source| DeviceError::Missing { index, source })?;

        if link.kind != LinkKind::Vlan {
            return Err(DeviceError::NotVlan {
                index,
                kind: link.kind.to_string(),
            });
        }

        info!(
            link = %link.name,
            index = link.index,
            vlan_id = spec.vlan_id,
            mac = %link.hardware_addr,
            "Created vlan link"
        );

        Ok(link)
    }
}

/// Describe why `existing` cannot stand in for `spec`, if it cannot.
pub fn links_incompat(spec: &LinkSpec, existing: &Link) -> Option<String> {
    if existing.kind != LinkKind::Vlan {
        return Some(format!("link type: {} vs {}", LinkKind::Vlan, existing.kind));
    }

    if existing.vlan_id != Some(spec.vlan_id) {
        let actual = existing
            .vlan_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        return Some(format!("VlanId: {} vs {}", spec.vlan_id, actual));
    }

    if existing.name != spec.name {
        return Some(format!("vlan name: {} vs {}", spec.name, existing.name));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{MockNetlink, MockOp, NetlinkError};

    fn setup() -> (Arc<MockNetlink>, LinkReconciler, u32) {
        let (mock, parent) = MockNetlink::with_uplink("eth0", "10.0.0.5/24".parse().unwrap());
        let mock = Arc::new(mock);
        let reconciler = LinkReconciler::new(mock.clone());
        (mock, reconciler, parent)
    }

    #[test]
    fn test_creates_missing_link() {
        let (mock, reconciler, parent) = setup();
        let link = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap();

        assert_eq!(link.name, "vlanet.42");
        assert_eq!(link.vlan_id, Some(42));
        assert_eq!(mock.link_add_count(), 1);
    }

    #[test]
    fn test_reuses_compatible_link() {
        let (mock, reconciler, parent) = setup();
        let spec = LinkSpec::vlan("vlanet.42", 42, parent);

        let first = reconciler.ensure(&spec).unwrap();
        mock.add_existing_addr("vlanet.42", "10.1.2.0/32".parse().unwrap());

        let second = reconciler.ensure(&spec).unwrap();
        assert_eq!(first.index, second.index);
        assert_eq!(mock.link_add_count(), 1);
        assert_eq!(mock.link_del_count(), 0);
        // existing state is left alone
        assert_eq!(mock.addrs("vlanet.42").len(), 1);
    }

    #[test]
    fn test_recreates_link_with_other_vlan_id() {
        let (mock, reconciler, parent) = setup();
        let stale = mock.add_existing_link("vlanet.42", LinkKind::Vlan, Some(7));

        let link = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap();

        assert_ne!(link.index, stale);
        assert_eq!(link.vlan_id, Some(42));
        assert_eq!(mock.link_del_count(), 1);
        assert_eq!(mock.link("vlanet.42").unwrap().vlan_id, Some(42));
    }

    #[test]
    fn test_recreates_link_of_other_kind() {
        let (mock, reconciler, parent) = setup();
        mock.add_existing_link("vlanet.42", LinkKind::Other("bridge".to_string()), None);

        let link = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap();

        assert_eq!(link.kind, LinkKind::Vlan);
        assert_eq!(mock.link_del_count(), 1);
    }

    #[test]
    fn test_delete_failure_is_fatal() {
        let (mock, reconciler, parent) = setup();
        mock.add_existing_link("vlanet.42", LinkKind::Vlan, Some(7));
        mock.fail(MockOp::LinkDel);

        let err = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap_err();
        assert!(matches!(err, DeviceError::DeleteFailed { .. }));
        assert!(err.to_string().contains("failed to delete interface vlanet.42"));
    }

    #[test]
    fn test_recreate_failure_is_fatal() {
        let (mock, reconciler, parent) = setup();
        mock.add_existing_link("vlanet.42", LinkKind::Vlan, Some(7));
        // the first attempt hits EEXIST, the retry fails
        mock.fail_link_add_after(1);

        let err = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap_err();
        assert!(matches!(err, DeviceError::CreateFailed { .. }));
        assert!(mock.link("vlanet.42").is_none());
    }

    #[test]
    fn test_other_create_failure_propagates() {
        let (mock, reconciler, parent) = setup();
        mock.fail(MockOp::LinkAdd);

        let err = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Netlink(NetlinkError::Failed { .. })
        ));
        assert_eq!(mock.link_del_count(), 0);
    }

    #[test]
    fn test_lookup_by_index_failure() {
        let (mock, reconciler, parent) = setup();
        mock.fail(MockOp::LinkByIndex);

        let err = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("can't locate created vlan device with index"));
    }

    #[test]
    fn test_created_link_of_wrong_kind() {
        let (mock, reconciler, parent) = setup();
        mock.misreport_kind_by_index(LinkKind::Other("dummy".to_string()));

        let err = reconciler
            .ensure(&LinkSpec::vlan("vlanet.42", 42, parent))
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotVlan { ref kind, .. } if kind == "dummy"));
    }

    #[test]
    fn test_links_incompat_reasons() {
        let spec = LinkSpec::vlan("vlanet.42", 42, 2);
        let mut link = Link {
            index: 9,
            name: "vlanet.42".to_string(),
            kind: LinkKind::Vlan,
            vlan_id: Some(42),
            parent_index: Some(2),
            hardware_addr: Default::default(),
            mtu: 1500,
            up: true,
        };
        assert_eq!(links_incompat(&spec, &link), None);

        link.vlan_id = Some(7);
        assert_eq!(
            links_incompat(&spec, &link).as_deref(),
            Some("VlanId: 42 vs 7")
        );

        link.vlan_id = Some(42);
        link.name = "eth0.42".to_string();
        assert_eq!(
            links_incompat(&spec, &link).as_deref(),
            Some("vlan name: vlanet.42 vs eth0.42")
        );

        link.kind = LinkKind::Device;
        assert_eq!(
            links_incompat(&spec, &link).as_deref(),
            Some("link type: vlan vs device")
        );
    }

    #[test]
    fn test_parent_is_not_part_of_identity() {
        let spec = LinkSpec::vlan("vlanet.42", 42, 2);
        let link = Link {
            index: 9,
            name: "vlanet.42".to_string(),
            kind: LinkKind::Vlan,
            vlan_id: Some(42),
            parent_index: Some(5),
            hardware_addr: Default::default(),
            mtu: 1500,
            up: false,
        };
        assert_eq!(links_incompat(&spec, &link), None);
    }
}
