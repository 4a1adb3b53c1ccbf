//! Dependency declaration and resolution.
//!
//! [`DependencyAware`] decorates a component with an ordered, duplicate-free list of the component identifiers it
//! depends on, and resolves them against a [`Registry`] on demand. Declaring a dependency never touches the registry:
//! identifiers are only checked when they're resolved.
//!
//! Resolution walks the dependency graph depth-first before every lookup, following the declared dependencies of any
//! dependency-aware component it finds along the way, and fails if the walk ever loops back on itself. The walk is not
//! cached, so the graph is re-examined on every call.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use armature_error::GenericError;
use indexmap::IndexSet;
use serde_json::Value;
use snafu::Snafu;
use tracing::debug;

use crate::{
    components::{Component, ComponentType, Metadata, Role},
    context::{Context, Environment},
    ids::ComponentId,
    registry::{Registry, RegistryError},
};

/// Dependency errors.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DependencyError {
    /// Resolving the dependency would loop forever.
    #[snafu(display("Circular dependency detected: {}", path.join(" -> ")))]
    CircularDependency {
        /// The offending path, starting at the resolving component and ending at the repeated identifier.
        path: Vec<String>,
    },

    /// The dependency could not be looked up.
    #[snafu(display("Failed to resolve dependency '{}': {}", component_id, source))]
    Resolution {
        /// The dependency identifier.
        component_id: String,

        /// The underlying registry error.
        source: RegistryError,
    },
}

impl DependencyError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CircularDependency { .. } => "dependency.circular_dependency",
            Self::Resolution { .. } => "dependency.resolution_failed",
        }
    }

    /// Returns the underlying registry error, if the dependency could not be looked up.
    pub fn registry_error(&self) -> Option<&RegistryError> {
        match self {
            Self::Resolution { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A component decorated with a declared dependency set.
///
/// `DependencyAware` implements [`Component`] itself, delegating identity and role to the wrapped component, and
/// reports its dependency set through [`Component::declared_dependencies`]. Registering a `DependencyAware` in place of
/// the wrapped component is what lets other resolvers follow its dependencies when checking for cycles.
pub struct DependencyAware {
    component: Arc<dyn Component>,
    dependencies: RwLock<Vec<ComponentId>>,
}

impl DependencyAware {
    /// Wraps the given component, with no declared dependencies.
    pub fn new(component: Arc<dyn Component>) -> Self {
        Self {
            component,
            dependencies: RwLock::new(Vec::new()),
        }
    }

    /// Wraps the given component, declaring each of the given dependencies.
    ///
    /// Empty and duplicate identifiers are skipped, as with [`add_dependency`][Self::add_dependency].
    pub fn with_dependencies<I, S>(component: Arc<dyn Component>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wrapped = Self::new(component);
        for dependency in dependencies {
            wrapped.add_dependency(dependency.as_ref());
        }
        wrapped
    }

    /// Returns the wrapped component.
    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    /// Declares a dependency.
    ///
    /// Empty identifiers are ignored, and so are identifiers that are already declared.
    pub fn add_dependency(&self, component_id: &str) {
        let Ok(component_id) = ComponentId::try_from(component_id) else {
            return;
        };

        let mut dependencies = self.dependencies.write().unwrap();
        if !dependencies.contains(&component_id) {
            dependencies.push(component_id);
        }
    }

    /// Removes a declared dependency.
    ///
    /// Returns `true` if the dependency was declared.
    pub fn remove_dependency(&self, component_id: &str) -> bool {
        let mut dependencies = self.dependencies.write().unwrap();
        match dependencies.iter().position(|id| id == component_id) {
            Some(idx) => {
                dependencies.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the given identifier is a declared dependency.
    pub fn has_dependency(&self, component_id: &str) -> bool {
        self.dependencies.read().unwrap().iter().any(|id| id == component_id)
    }

    /// Returns the declared dependencies, in declaration order.
    pub fn dependencies(&self) -> Vec<ComponentId> {
        self.dependencies.read().unwrap().clone()
    }

    /// Resolves a single dependency against the given registry.
    ///
    /// The identifier does not need to be a declared dependency.
    ///
    /// # Errors
    ///
    /// If resolving the identifier would lead back to this component, or to any component already on the path being
    /// explored, `DependencyError::CircularDependency` is returned. If the identifier is not registered,
    /// `DependencyError::Resolution` is returned.
    pub fn resolve_dependency(
        &self, component_id: &str, registry: &Registry,
    ) -> Result<Arc<dyn Component>, DependencyError> {
        let mut on_path = IndexSet::new();
        self.check_for_cycles(component_id, registry, &mut on_path)?;

        registry.get(component_id).map_err(|source| DependencyError::Resolution {
            component_id: component_id.to_string(),
            source,
        })
    }

    /// Resolves every declared dependency against the given registry.
    ///
    /// The dependency list is snapshotted before the registry is consulted, and resolution stops at the first failure.
    /// On success, the returned map holds exactly the declared dependencies: their own dependencies are not included.
    ///
    /// # Errors
    ///
    /// If any declared dependency fails to resolve, that error is returned.
    pub fn resolve_dependencies(
        &self, registry: &Registry,
    ) -> Result<HashMap<ComponentId, Arc<dyn Component>>, DependencyError> {
        let dependencies = self.dependencies();

        let mut resolved = HashMap::with_capacity(dependencies.len());
        for dependency in dependencies {
            let component = self.resolve_dependency(&dependency, registry)?;
            resolved.insert(dependency, component);
        }

        debug!(
            component_id = self.component.id(),
            resolved = resolved.len(),
            "Resolved dependencies."
        );

        Ok(resolved)
    }

    fn check_for_cycles(
        &self, component_id: &str, registry: &Registry, on_path: &mut IndexSet<String>,
    ) -> Result<(), DependencyError> {
        if component_id == self.component.id() || on_path.contains(component_id) {
            let path = std::iter::once(self.component.id())
                .chain(on_path.iter().map(String::as_str))
                .chain(std::iter::once(component_id))
                .map(String::from)
                .collect();
            return Err(DependencyError::CircularDependency { path });
        }

        // A dependency that isn't registered has nothing further to explore. Whether that's an error is decided by the
        // lookup that follows the cycle check.
        let Ok(target) = registry.get(component_id) else {
            return Ok(());
        };

        if let Some(dependencies) = target.declared_dependencies() {
            on_path.insert(component_id.to_string());
            for dependency in dependencies {
                self.check_for_cycles(&dependency, registry, on_path)?;
            }
            on_path.shift_remove(component_id);
        }

        Ok(())
    }
}

impl Component for DependencyAware {
    fn id(&self) -> &str {
        self.component.id()
    }

    fn name(&self) -> &str {
        self.component.name()
    }

    fn description(&self) -> &str {
        self.component.description()
    }

    fn version(&self) -> &str {
        self.component.version()
    }

    fn component_type(&self) -> ComponentType {
        self.component.component_type()
    }

    fn metadata(&self) -> Metadata {
        self.component.metadata()
    }

    fn set_metadata(&self, key: &str, value: Value) {
        self.component.set_metadata(key, value)
    }

    fn initialize(&self, ctx: &Context, env: &Environment) -> Result<(), GenericError> {
        self.component.initialize(ctx, env)
    }

    fn dispose(&self) -> Result<(), GenericError> {
        self.component.dispose()
    }

    fn role(&self) -> Role<'_> {
        self.component.role()
    }

    fn declared_dependencies(&self) -> Option<Vec<ComponentId>> {
        Some(self.dependencies())
    }
}
