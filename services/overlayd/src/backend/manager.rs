//! Backend lookup by type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use super::{Backend, BackendDeps, VlanBackend, VLAN_BACKEND_TYPE};
use crate::error::BackendError;

/// Builds a backend from the shared collaborators.
pub type BackendCtor = fn(&BackendDeps) -> Result<Arc<dyn Backend>, BackendError>;

/// Maps backend types to constructors and caches one instance per type.
pub struct BackendManager {
    deps: BackendDeps,
    ctors: HashMap<String, BackendCtor>,
    active: Mutex<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendManager {
    /// Create a manager with the built-in backends registered.
    pub fn new(deps: BackendDeps) -> Self {
        let mut manager = Self {
            deps,
            ctors: HashMap::new(),
            active: Mutex::new(HashMap::new()),
        };
        manager.register(VLAN_BACKEND_TYPE, |deps| {
            Ok(Arc::new(VlanBackend::new(deps.clone())))
        });
        manager
    }

    /// Register (or replace) the constructor for `backend_type`.
    pub fn register(&mut self, backend_type: &str, ctor: BackendCtor) {
        self.ctors.insert(backend_type.to_lowercase(), ctor);
    }

    /// Return the backend for `backend_type`, constructing it on first use.
    pub fn get_backend(&self, backend_type: &str) -> Result<Arc<dyn Backend>, BackendError> {
        let backend_type = backend_type.to_lowercase();

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(backend) = active.get(&backend_type) {
            return Ok(Arc::clone(backend));
        }

        let ctor = self
            .ctors
            .get(&backend_type)
            .ok_or_else(|| BackendError::UnknownBackend(backend_type.clone()))?;

        let backend = ctor(&self.deps)?;
        info!(backend = %backend_type, "Backend initialized");
        active.insert(backend_type, Arc::clone(&backend));

        Ok(backend)
    }
}
