//! Process-wide ownership of link names.
//!
//! The reconcile-then-recreate sequence is not safe if two callers run it
//! for the same name at once. A device must hold a [`LinkClaim`] for its
//! link name; a second claim on a held name fails instead of interleaving.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::DeviceError;

/// Registry of link names currently owned by a device.
#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a link name.
    pub fn claim(&self, name: &str) -> Result<LinkClaim, DeviceError> {
        if !self.lock().insert(name.to_string()) {
            return Err(DeviceError::InUse(name.to_string()));
        }

        debug!(link = %name, "Link name claimed");
        Ok(LinkClaim {
            name: name.to_string(),
            registry: self.clone(),
        })
    }

    /// Check whether a name is currently claimed.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ownership token for a link name; released on drop.
#[derive(Debug)]
pub struct LinkClaim {
    name: String,
    registry: LinkRegistry,
}

impl LinkClaim {
    /// The claimed link name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LinkClaim {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
        debug!(link = %self.name, "Link name released");
    }
}
