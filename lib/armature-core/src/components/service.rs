use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{
            AtomicBool, AtomicU8,
            Ordering::{Acquire, Release},
        },
        Mutex, MutexGuard, PoisonError,
    },
};

use armature_error::{generic_error, GenericError};
use serde_json::Value;
use tracing::{debug, warn};

use super::{BaseComponent, Component, ComponentConfig, ComponentType, Metadata, Role};
use crate::{
    context::{Context, Environment},
    lifecycle::panic_message,
};

/// Service status.
///
/// Services move along `Stopped → Starting → Running` when started, and `Running → Stopping → Stopped` when stopped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum ServiceStatus {
    /// The service is not running.
    Stopped = 0,

    /// The service is in the process of starting.
    Starting = 1,

    /// The service is running.
    Running = 2,

    /// The service is in the process of stopping.
    Stopping = 3,
}

impl ServiceStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component that can be started and stopped.
///
/// Both [`start`][Service::start] and [`stop`][Service::stop] are idempotent: starting a running service, or stopping a
/// stopped one, succeeds without doing anything.
pub trait Service: Component {
    /// Starts the service.
    ///
    /// # Errors
    ///
    /// If the service fails to start, an error is returned and the service is left stopped.
    fn start(&self, ctx: &Context) -> Result<(), GenericError>;

    /// Stops the service.
    ///
    /// # Errors
    ///
    /// If the service fails to stop cleanly, an error is returned. The service is considered stopped regardless.
    fn stop(&self, ctx: &Context) -> Result<(), GenericError>;

    /// Returns `true` if the service is running.
    fn is_running(&self) -> bool;

    /// Returns the current service status.
    fn status(&self) -> ServiceStatus;
}

/// The base service.
///
/// Concrete services embed a `BaseService` and drive their own start/stop logic through
/// [`start_with`][BaseService::start_with] and [`stop_with`][BaseService::stop_with], which take care of status
/// bookkeeping and idempotency.
pub struct BaseService {
    component: BaseComponent,
    running: AtomicBool,
    status: AtomicU8,

    // Serializes start/stop transitions so that concurrent callers can't interleave them. Status reads never touch it.
    transition: Mutex<()>,
}

impl BaseService {
    /// Creates a new `BaseService` from the given configuration.
    pub fn new(config: ComponentConfig) -> Self {
        Self {
            component: BaseComponent::new(config),
            running: AtomicBool::new(false),
            status: AtomicU8::new(ServiceStatus::Stopped as u8),
            transition: Mutex::new(()),
        }
    }

    /// Returns the embedded base component.
    pub fn base(&self) -> &BaseComponent {
        &self.component
    }

    fn set_status(&self, status: ServiceStatus) {
        self.status.store(status as u8, Release);
    }

    // Hooks run under `catch_unwind`, so the guard only protects `()` and a poisoned lock carries no broken state.
    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_hook<F>(&self, action: &'static str, f: F) -> Result<(), GenericError>
    where
        F: FnOnce() -> Result<(), GenericError>,
    {
        catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(component_id = self.component.id(), action, panic = %message, "Service hook panicked.");
            Err(generic_error!("Service '{}' panicked during {}: {}", self.component.id(), action, message))
        })
    }

    /// Starts the service, running `f` while the service is in the `Starting` state.
    ///
    /// If the service is already running, `f` is not called and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// If `f` returns an error or panics, the service goes back to `Stopped` and an error is returned.
    pub fn start_with<F>(&self, f: F) -> Result<(), GenericError>
    where
        F: FnOnce() -> Result<(), GenericError>,
    {
        let _guard = self.lock_transition();
        if self.running.load(Acquire) {
            return Ok(());
        }

        self.set_status(ServiceStatus::Starting);
        match self.run_hook("start", f) {
            Ok(()) => {
                self.running.store(true, Release);
                self.set_status(ServiceStatus::Running);
                debug!(component_id = self.component.id(), "Service started.");
                Ok(())
            }
            Err(e) => {
                self.set_status(ServiceStatus::Stopped);
                Err(e)
            }
        }
    }

    /// Stops the service, running `f` while the service is in the `Stopping` state.
    ///
    /// If the service is already stopped, `f` is not called and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// If `f` returns an error or panics, an error is returned. The service still ends up `Stopped`.
    pub fn stop_with<F>(&self, f: F) -> Result<(), GenericError>
    where
        F: FnOnce() -> Result<(), GenericError>,
    {
        let _guard = self.lock_transition();
        if !self.running.load(Acquire) {
            return Ok(());
        }

        self.set_status(ServiceStatus::Stopping);
        let result = self.run_hook("stop", f);
        self.running.store(false, Release);
        self.set_status(ServiceStatus::Stopped);
        debug!(component_id = self.component.id(), "Service stopped.");

        result
    }
}

impl Component for BaseService {
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
        Role::Service(self)
    }
}

impl Service for BaseService {
    fn start(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.start_with(|| Ok(()))
    }

    fn stop(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.stop_with(|| Ok(()))
    }

    fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Acquire))
    }
}
