//! System façade.
//!
//! [`System`] looks components up by identifier and dispatches to whichever capability the caller asked for, checking
//! the component's [`Role`][crate::components::Role] first. It never owns components itself: the registry does.

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering::{AcqRel, Acquire},
    },
    Arc,
};

use armature_error::GenericError;
use snafu::Snafu;
use tracing::debug;

use crate::{
    components::{Capability, Component, Operation, OperationInput, OperationOutput, Service},
    context::{Context, Environment},
    registry::{Registry, RegistryError},
};

/// System errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SystemError {
    /// The component could not be looked up.
    #[snafu(display("{}", source))]
    Lookup {
        /// The underlying registry error.
        source: RegistryError,
    },

    /// The component does not provide the requested capability.
    #[snafu(display("Component '{}' is not a {}.", component_id, capability))]
    InvalidComponentType {
        /// The component identifier.
        component_id: String,

        /// The capability that was required.
        capability: Capability,
    },

    /// The operation failed.
    #[snafu(display("Operation '{}' failed: {}", component_id, source))]
    OperationFailed {
        /// The operation identifier.
        component_id: String,

        /// The error returned by the operation.
        source: GenericError,
    },

    /// The service failed to start or stop.
    #[snafu(display("Service '{}' failed: {}", component_id, source))]
    ServiceFailed {
        /// The service identifier.
        component_id: String,

        /// The error returned by the service.
        source: GenericError,
    },
}

impl SystemError {
    /// Returns the stable error code for this error.
    ///
    /// Lookup failures report the code of the underlying registry error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lookup { source } => source.code(),
            Self::InvalidComponentType { .. } => "component.invalid_component_type",
            Self::OperationFailed { .. } => "component.operation_failed",
            Self::ServiceFailed { .. } => "component.service_failed",
        }
    }
}

/// Dispatches operation execution and service start/stop through a registry.
pub struct System {
    registry: Registry,
    running: AtomicBool,
}

impl System {
    /// Creates a new `System` over the given registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns an environment suitable for initializing components against this system's registry.
    pub fn environment(&self) -> Environment {
        Environment::new(self.registry.clone())
    }

    /// Executes the operation registered under the given identifier.
    ///
    /// # Errors
    ///
    /// If no component is registered under `component_id`, or it is not an operation, or the operation itself fails,
    /// an error is returned.
    pub fn execute_operation(
        &self, ctx: &Context, component_id: &str, input: OperationInput,
    ) -> Result<OperationOutput, SystemError> {
        let component = self.lookup(component_id)?;
        let operation = require_operation(component.as_ref())?;

        debug!(component_id, "Executing operation.");
        operation
            .execute(ctx, input)
            .map_err(|source| SystemError::OperationFailed {
                component_id: component_id.to_string(),
                source,
            })
    }

    /// Starts the service registered under the given identifier.
    ///
    /// # Errors
    ///
    /// If no component is registered under `component_id`, or it is not a service, or the service fails to start, an
    /// error is returned.
    pub fn start_service(&self, ctx: &Context, component_id: &str) -> Result<(), SystemError> {
        let component = self.lookup(component_id)?;
        let service = require_service(component.as_ref())?;

        debug!(component_id, "Starting service.");
        service.start(ctx).map_err(|source| SystemError::ServiceFailed {
            component_id: component_id.to_string(),
            source,
        })
    }

    /// Stops the service registered under the given identifier.
    ///
    /// # Errors
    ///
    /// If no component is registered under `component_id`, or it is not a service, or the service fails to stop, an
    /// error is returned.
    pub fn stop_service(&self, ctx: &Context, component_id: &str) -> Result<(), SystemError> {
        let component = self.lookup(component_id)?;
        let service = require_service(component.as_ref())?;

        debug!(component_id, "Stopping service.");
        service.stop(ctx).map_err(|source| SystemError::ServiceFailed {
            component_id: component_id.to_string(),
            source,
        })
    }

    /// Marks the system as running.
    ///
    /// This does not start any service. Starting an already running system is a no-op.
    pub fn start(&self, _ctx: &Context) {
        if !self.running.swap(true, AcqRel) {
            debug!("System started.");
        }
    }

    /// Marks the system as stopped.
    ///
    /// This does not stop any service. Stopping an already stopped system is a no-op.
    pub fn stop(&self, _ctx: &Context) {
        if self.running.swap(false, AcqRel) {
            debug!("System stopped.");
        }
    }

    /// Returns `true` if the system is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }

    fn lookup(&self, component_id: &str) -> Result<Arc<dyn Component>, SystemError> {
        self.registry
            .get(component_id)
            .map_err(|source| SystemError::Lookup { source })
    }
}

fn require_operation(component: &dyn Component) -> Result<&dyn Operation, SystemError> {
    component
        .role()
        .as_operation()
        .ok_or_else(|| SystemError::InvalidComponentType {
            component_id: component.id().to_string(),
            capability: Capability::Operation,
        })
}

fn require_service(component: &dyn Component) -> Result<&dyn Service, SystemError> {
    component
        .role()
        .as_service()
        .ok_or_else(|| SystemError::InvalidComponentType {
            component_id: component.id().to_string(),
            capability: Capability::Service,
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::components::{BaseComponent, BaseOperation, BaseService, ComponentConfig, ComponentType, ServiceStatus};

    fn system() -> System {
        let registry = Registry::new();
        registry
            .register(Arc::new(BaseService::new(ComponentConfig::new("db-conn", ComponentType::Service))))
            .unwrap();
        registry
            .register(Arc::new(BaseOperation::new(ComponentConfig::new("echo", ComponentType::Operation))))
            .unwrap();
        registry
            .register(Arc::new(BaseComponent::new(ComponentConfig::new("cfg", ComponentType::Basic))))
            .unwrap();
        System::new(registry)
    }

    fn status_of(system: &System, component_id: &str) -> ServiceStatus {
        let component = system.registry().get(component_id).unwrap();
        let status = component.role().as_service().unwrap().status();
        status
    }

    #[test]
    fn start_and_stop_service() {
        let system = system();
        let ctx = Context::background();

        assert_eq!(status_of(&system, "db-conn"), ServiceStatus::Stopped);

        system.start_service(&ctx, "db-conn").unwrap();
        assert_eq!(status_of(&system, "db-conn"), ServiceStatus::Running);
        assert_eq!(status_of(&system, "db-conn").as_str(), "Running");

        system.stop_service(&ctx, "db-conn").unwrap();
        assert_eq!(status_of(&system, "db-conn"), ServiceStatus::Stopped);
    }

    #[test]
    fn execute_operation_returns_result_verbatim() {
        let system = system();
        let input = OperationInput::new(json!({ "sql": "select 1" }));

        let output = system
            .execute_operation(&Context::background(), "echo", input.clone())
            .unwrap();
        assert_eq!(output.data, input.data);
    }

    #[test]
    fn missing_component_propagates_not_found() {
        let system = system();
        let ctx = Context::background();

        let err = system
            .execute_operation(&ctx, "missing-op", OperationInput::default())
            .unwrap_err();
        assert_eq!(err.code(), "registry.item_not_found");
        assert!(matches!(
            err,
            SystemError::Lookup {
                source: RegistryError::ItemNotFound { .. }
            }
        ));

        assert_eq!(system.start_service(&ctx, "").unwrap_err().code(), "registry.invalid_item");
    }

    #[test]
    fn capability_mismatch_is_rejected() {
        let system = system();
        let ctx = Context::background();

        let err = system.start_service(&ctx, "cfg").unwrap_err();
        assert_eq!(err.code(), "component.invalid_component_type");
        assert_eq!(err.to_string(), "Component 'cfg' is not a service.");

        let err = system.stop_service(&ctx, "echo").unwrap_err();
        assert_eq!(err.code(), "component.invalid_component_type");

        let err = system
            .execute_operation(&ctx, "db-conn", OperationInput::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SystemError::InvalidComponentType {
                capability: Capability::Operation,
                ..
            }
        ));
    }

    #[test]
    fn system_running_flag_is_independent_of_services() {
        let system = system();
        let ctx = Context::background();

        assert!(!system.is_running());
        system.start(&ctx);
        system.start(&ctx);
        assert!(system.is_running());
        assert_eq!(status_of(&system, "db-conn"), ServiceStatus::Stopped);

        system.stop(&ctx);
        system.stop(&ctx);
        assert!(!system.is_running());
    }

    #[test]
    fn environment_shares_the_registry() {
        let system = system();
        let env = system.environment();
        assert!(env.registry().has("db-conn"));
    }
}
