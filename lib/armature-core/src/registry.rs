//! Component registry.
//!
//! The [`Registry`] is the single source of truth mapping component identifiers to component instances. Everything
//! else in the runtime (dependency resolution, the system façade, plugins) looks components up through it.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use metrics::gauge;
use snafu::Snafu;
use tracing::debug;

use crate::{
    components::{Component, ComponentType},
    ids::ComponentId,
};

/// Registry errors.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistryError {
    /// The item given to the registry was not valid.
    #[snafu(display("Invalid registry item: {}", reason))]
    InvalidItem {
        /// Why the item was rejected.
        reason: &'static str,
    },

    /// An item with the same identifier is already registered.
    #[snafu(display("Component '{}' is already registered.", component_id))]
    ItemAlreadyExists {
        /// The conflicting identifier.
        component_id: String,
    },

    /// No item is registered under the given identifier.
    #[snafu(display("Component '{}' not found in registry.", component_id))]
    ItemNotFound {
        /// The identifier that was looked up.
        component_id: String,
    },
}

impl RegistryError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidItem { .. } => "registry.invalid_item",
            Self::ItemAlreadyExists { .. } => "registry.item_already_exists",
            Self::ItemNotFound { .. } => "registry.item_not_found",
        }
    }
}

/// A thread-safe store of components, keyed by identifier.
///
/// All read operations (`get`, `has`, `list`, `find`, `get_by_type`, `count`) take a shared lock, and all mutating
/// operations (`register`, `unregister`, `clear`) take an exclusive lock. Predicates given to `find` run under the
/// shared lock, so they must not mutate the registry.
///
/// `Registry` is `Clone`, and clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<ComponentId, Arc<dyn Component>>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component.
    ///
    /// # Errors
    ///
    /// If the component identifier is empty, or a component with the same identifier is already registered, an error is
    /// returned and the registry is left unchanged.
    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), RegistryError> {
        let component_id =
            ComponentId::try_from(component.id()).map_err(|reason| RegistryError::InvalidItem { reason })?;

        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&component_id) {
            return Err(RegistryError::ItemAlreadyExists {
                component_id: component_id.to_string(),
            });
        }

        debug!(%component_id, component_type = %component.component_type(), "Registered component.");
        inner.insert(component_id, component);
        gauge!("armature.registry.components").set(inner.len() as f64);

        Ok(())
    }

    /// Gets a component by identifier.
    ///
    /// # Errors
    ///
    /// If the identifier is empty, or no component is registered under it, an error is returned.
    pub fn get(&self, component_id: &str) -> Result<Arc<dyn Component>, RegistryError> {
        if component_id.is_empty() {
            return Err(RegistryError::InvalidItem {
                reason: "component IDs cannot be empty",
            });
        }

        self.inner
            .read()
            .unwrap()
            .get(component_id)
            .cloned()
            .ok_or_else(|| RegistryError::ItemNotFound {
                component_id: component_id.to_string(),
            })
    }

    /// Gets all components of the given type.
    pub fn get_by_type(&self, component_type: ComponentType) -> Vec<Arc<dyn Component>> {
        self.find(|component| component.component_type() == component_type)
    }

    /// Gets all components matching the given predicate.
    pub fn find<F>(&self, predicate: F) -> Vec<Arc<dyn Component>>
    where
        F: Fn(&dyn Component) -> bool,
    {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter(|component| predicate(component.as_ref()))
            .cloned()
            .collect()
    }

    /// Returns `true` if a component is registered under the given identifier.
    pub fn has(&self, component_id: &str) -> bool {
        self.inner.read().unwrap().contains_key(component_id)
    }

    /// Returns the identifiers of all registered components, in no particular order.
    pub fn list(&self) -> Vec<ComponentId> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    /// Returns the number of registered components.
    pub fn count(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Removes a component, returning it.
    ///
    /// # Errors
    ///
    /// If no component is registered under the given identifier, an error is returned.
    pub fn unregister(&self, component_id: &str) -> Result<Arc<dyn Component>, RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let component = inner.remove(component_id).ok_or_else(|| RegistryError::ItemNotFound {
            component_id: component_id.to_string(),
        })?;

        debug!(component_id, "Unregistered component.");
        gauge!("armature.registry.components").set(inner.len() as f64);

        Ok(component)
    }

    /// Removes all components.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.clear();
        gauge!("armature.registry.components").set(0.0);
    }
}
