//! Component construction from configuration.

use std::{collections::HashMap, sync::Arc};

use armature_error::GenericError;
use snafu::Snafu;
use tracing::debug;

use crate::{
    components::{BaseComponent, BaseOperation, BaseService, Component, ComponentConfig, ComponentType},
    dependency::DependencyAware,
};

/// A component constructor.
pub type ComponentConstructor =
    Arc<dyn Fn(&ComponentConfig) -> Result<Arc<dyn Component>, GenericError> + Send + Sync>;

/// Factory errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum FactoryError {
    /// The configuration is not valid.
    #[snafu(display("Invalid component configuration: {}", reason))]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: &'static str,
    },

    /// No constructor is registered for the component type.
    #[snafu(display("Unsupported component type '{}'.", component_type))]
    UnsupportedType {
        /// The requested component type.
        component_type: ComponentType,
    },

    /// The constructor failed.
    #[snafu(display("Failed to construct component '{}': {}", component_id, source))]
    Construction {
        /// The component identifier.
        component_id: String,

        /// The error returned by the constructor.
        source: GenericError,
    },
}

impl FactoryError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "factory.invalid_config",
            Self::UnsupportedType { .. } => "factory.unsupported_type",
            Self::Construction { .. } => "factory.construction_failed",
        }
    }
}

/// Builds components from [`ComponentConfig`]s.
///
/// Constructors are keyed by [`ComponentType`]. A default factory knows how to build the base component, service, and
/// operation types, and any of those can be overridden with [`register`][Self::register].
///
/// When a configuration declares dependencies, the constructed component is wrapped in a [`DependencyAware`] carrying
/// them.
#[derive(Clone)]
pub struct ComponentFactory {
    constructors: HashMap<ComponentType, ComponentConstructor>,
}

impl ComponentFactory {
    /// Creates a factory with constructors for the base types.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(ComponentType::Basic, |config| {
            Ok(Arc::new(BaseComponent::new(config.clone())) as Arc<dyn Component>)
        });
        factory.register(ComponentType::Service, |config| {
            Ok(Arc::new(BaseService::new(config.clone())) as Arc<dyn Component>)
        });
        factory.register(ComponentType::Operation, |config| {
            Ok(Arc::new(BaseOperation::new(config.clone())) as Arc<dyn Component>)
        });
        factory
    }

    /// Creates a factory without any constructors.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers the constructor for a component type, replacing any existing one.
    pub fn register<F>(&mut self, component_type: ComponentType, constructor: F) -> &mut Self
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Component>, GenericError> + Send + Sync + 'static,
    {
        self.constructors.insert(component_type, Arc::new(constructor));
        self
    }

    /// Returns `true` if the factory can build the given component type.
    pub fn supports(&self, component_type: ComponentType) -> bool {
        self.constructors.contains_key(&component_type)
    }

    /// Builds a component from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration has an empty identifier, or no constructor is registered for its type, or the constructor
    /// fails, an error is returned.
    pub fn create(&self, config: &ComponentConfig) -> Result<Arc<dyn Component>, FactoryError> {
        if config.id.is_empty() {
            return Err(FactoryError::InvalidConfig {
                reason: "component IDs cannot be empty",
            });
        }

        let constructor = self
            .constructors
            .get(&config.component_type)
            .ok_or(FactoryError::UnsupportedType {
                component_type: config.component_type,
            })?;

        let component = constructor(config).map_err(|source| FactoryError::Construction {
            component_id: config.id.clone(),
            source,
        })?;

        if component.id() != config.id {
            return Err(FactoryError::InvalidConfig {
                reason: "constructed component ID does not match the configured ID",
            });
        }

        debug!(component_id = %config.id, component_type = %config.component_type, "Created component.");

        if config.dependencies.is_empty() {
            Ok(component)
        } else {
            Ok(Arc::new(DependencyAware::with_dependencies(component, &config.dependencies)))
        }
    }
}

impl Default for ComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}
