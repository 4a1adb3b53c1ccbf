//! Component basics.
//!
//! A component is a named, typed, versioned unit that can be registered in a [`Registry`][crate::registry::Registry].
//! On top of the base identity contract, a component may expose additional _capabilities_: it can be a [`Service`]
//! (something that can be started and stopped) or an [`Operation`] (something that can be executed). Capabilities are
//! discovered through [`Component::role`], which callers pattern match on instead of downcasting.

use std::{collections::HashMap, fmt};

use armature_error::GenericError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::{Context, Environment},
    ids::ComponentId,
};

mod base;
pub use self::base::BaseComponent;

mod config;
pub use self::config::{ComponentConfig, DEFAULT_COMPONENT_VERSION};

mod operation;
pub use self::operation::{BaseOperation, Operation, OperationInput, OperationOutput};

mod service;
pub use self::service::{BaseService, Service, ServiceStatus};

/// Free-form component annotations.
pub type Metadata = HashMap<String, Value>;

/// Component type.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// A plain component with no particular capability.
    #[default]
    Basic,

    /// A component that can be executed.
    Operation,

    /// A component that can be started and stopped.
    Service,

    /// A system-level component.
    System,

    /// An application-level component.
    Application,
}

impl ComponentType {
    /// Returns the string representation of the component type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Operation => "operation",
            Self::Service => "service",
            Self::System => "system",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability that a component may provide beyond its base identity contract.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Capability {
    /// See [`Service`].
    Service,

    /// See [`Operation`].
    Operation,
}

impl Capability {
    /// Returns the string representation of the capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Operation => "operation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a component plays, as reported by [`Component::role`].
#[derive(Clone, Copy)]
pub enum Role<'a> {
    /// The component has no capability beyond the base contract.
    Plain,

    /// The component can be started and stopped.
    Service(&'a dyn Service),

    /// The component can be executed.
    Operation(&'a dyn Operation),
}

impl<'a> Role<'a> {
    /// Returns the service capability, if this role has one.
    pub fn as_service(self) -> Option<&'a dyn Service> {
        match self {
            Self::Service(service) => Some(service),
            _ => None,
        }
    }

    /// Returns the operation capability, if this role has one.
    pub fn as_operation(self) -> Option<&'a dyn Operation> {
        match self {
            Self::Operation(operation) => Some(operation),
            _ => None,
        }
    }

    /// Returns `true` if this role provides the given capability.
    pub fn provides(self, capability: Capability) -> bool {
        matches!(
            (self, capability),
            (Self::Service(_), Capability::Service) | (Self::Operation(_), Capability::Operation)
        )
    }
}

/// The base component contract.
///
/// All methods take `&self`: components are shared (`Arc<dyn Component>`) between the registry and any number of
/// callers, so implementations use interior mutability for whatever state they keep.
pub trait Component: Send + Sync {
    /// Returns the component identifier.
    fn id(&self) -> &str;

    /// Returns the human-readable component name.
    fn name(&self) -> &str;

    /// Returns the component description.
    fn description(&self) -> &str;

    /// Returns the component version.
    fn version(&self) -> &str;

    /// Returns the component type.
    fn component_type(&self) -> ComponentType;

    /// Returns a copy of the component metadata.
    ///
    /// Mutating the returned map has no effect on the component.
    fn metadata(&self) -> Metadata;

    /// Sets a single metadata entry.
    fn set_metadata(&self, key: &str, value: Value);

    /// Initializes the component.
    ///
    /// # Errors
    ///
    /// If the component cannot be initialized, an error is returned.
    fn initialize(&self, ctx: &Context, env: &Environment) -> Result<(), GenericError>;

    /// Disposes of the component.
    ///
    /// Disposing must be idempotent, and must be safe to call even if the component was never initialized.
    ///
    /// # Errors
    ///
    /// If the component cannot release its resources, an error is returned.
    fn dispose(&self) -> Result<(), GenericError>;

    /// Returns the role this component plays.
    fn role(&self) -> Role<'_> {
        Role::Plain
    }

    /// Returns the identifiers this component declares as dependencies, if it is dependency-aware.
    ///
    /// Components that do not track dependencies return `None`, which is distinct from a dependency-aware component with
    /// an empty dependency set (`Some(vec![])`).
    fn declared_dependencies(&self) -> Option<Vec<ComponentId>> {
        None
    }
}

impl fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id())
            .field("type", &self.component_type())
            .field("version", &self.version())
            .finish()
    }
}
