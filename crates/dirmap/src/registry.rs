//! Named entity managers
//!
//! Applications talking to several directories register one manager per
//! directory under a name and hand the registry to whatever needs them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::client::DirectoryClient;
use crate::error::{EntityError, EntityResult};
use crate::manager::EntityManager;

/// Name looked up when no manager name is given.
pub const DEFAULT_MANAGER: &str = "default";

/// Entity managers keyed by name.
#[derive(Debug, Default)]
pub struct EntityManagerRegistry {
    managers: RwLock<HashMap<String, Arc<EntityManager>>>,
}

impl EntityManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager with the default configuration over `client`.
    ///
    /// Fails with [`EntityError::DuplicateManager`] if `name` is taken.
    pub fn add_entity_manager(
        &self,
        name: impl Into<String>,
        client: Arc<dyn DirectoryClient>,
    ) -> EntityResult<Arc<EntityManager>> {
        self.add_manager(name, EntityManager::new(client))
    }

    /// Register an already configured manager.
    pub fn add_manager(
        &self,
        name: impl Into<String>,
        manager: EntityManager,
    ) -> EntityResult<Arc<EntityManager>> {
        let name = name.into();
        let mut managers = self
            .managers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if managers.contains_key(&name) {
            return Err(EntityError::DuplicateManager { name });
        }

        let manager = Arc::new(manager);
        info!(name = %name, base_dn = manager.client().base_dn(), "Registered entity manager");
        managers.insert(name, Arc::clone(&manager));
        Ok(manager)
    }

    /// Get a manager by name, or the one named [`DEFAULT_MANAGER`].
    pub fn get_entity_manager(&self, name: Option<&str>) -> EntityResult<Arc<EntityManager>> {
        let name = name.unwrap_or(DEFAULT_MANAGER);
        self.managers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| EntityError::NoManager {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .managers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.managers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
