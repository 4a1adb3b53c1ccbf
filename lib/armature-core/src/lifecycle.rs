//! Observable lifecycle state machine.
//!
//! [`LifecycleAware`] decorates any component with a lifecycle state and a list of observers that are notified on
//! every state change. The wrapper itself does not enforce a transition table: any state may follow any other state.
//! The only guarantees are that [`state`][LifecycleAware::state] always reflects the last value given to
//! [`set_state`][LifecycleAware::set_state], and that every actual change (old state different from new state) invokes
//! every registered observer once, in registration order.
//!
//! # Observer execution
//!
//! Observers run _after_ the new state has been committed and the internal lock has been released. This means an
//! observer may freely call back into the wrapper, including changing the state again, without deadlocking. The flip
//! side is that by the time an observer runs, the state may already have moved on: observers should rely on the
//! `(old, new)` pair they are handed rather than re-reading the current state.
//!
//! Each observer invocation is isolated from the others. An observer that returns an error, or panics, is logged and
//! reported in the resulting [`Transition`], and the remaining observers still run.

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use armature_error::GenericError;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    components::{Component, ComponentType, Metadata, Role},
    context::{Context, Environment},
    ids::ComponentId,
};

/// Lifecycle state.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum LifecycleState {
    /// The component has been created, but not yet initialized.
    #[default]
    Created,

    /// The component is being initialized.
    Initializing,

    /// The component has been initialized.
    Initialized,

    /// The component is active.
    Active,

    /// The component is being disposed.
    Disposing,

    /// The component has been disposed.
    Disposed,

    /// The component has failed.
    Failed,
}

impl LifecycleState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change observer.
///
/// Observers are called with `(old_state, new_state)`.
pub type StateObserver = Arc<dyn Fn(LifecycleState, LifecycleState) -> Result<(), GenericError> + Send + Sync>;

/// Why an observer invocation failed.
#[derive(Debug)]
pub enum ObserverFailureReason {
    /// The observer returned an error.
    Error(GenericError),

    /// The observer panicked.
    Panicked(String),
}

/// A failed observer invocation.
#[derive(Debug)]
pub struct ObserverFailure {
    /// Position of the observer in registration order.
    pub index: usize,

    /// Why it failed.
    pub reason: ObserverFailureReason,
}

/// The outcome of a call to [`LifecycleAware::set_state`].
#[derive(Debug)]
pub struct Transition {
    /// The state before the call.
    pub from: LifecycleState,

    /// The state after the call.
    pub to: LifecycleState,

    /// Number of observers invoked.
    ///
    /// This is zero when the state did not change.
    pub notified: usize,

    /// Observers that failed, in invocation order.
    pub failures: Vec<ObserverFailure>,
}

impl Transition {
    /// Returns `true` if the call actually changed the state.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Returns `true` if every invoked observer succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Inner {
    state: LifecycleState,
    observers: Vec<StateObserver>,
}

/// A component decorated with an observable lifecycle state machine.
///
/// `LifecycleAware` implements [`Component`] itself by delegating to the wrapped component, so it can be registered in
/// place of it. Its [`initialize`][Component::initialize] and [`dispose`][Component::dispose] implementations drive
/// the lifecycle state around the wrapped component's own hooks.
pub struct LifecycleAware {
    component: Arc<dyn Component>,
    inner: RwLock<Inner>,
}

impl LifecycleAware {
    /// Wraps the given component, starting in [`LifecycleState::Created`].
    pub fn new(component: Arc<dyn Component>) -> Self {
        Self {
            component,
            inner: RwLock::new(Inner {
                state: LifecycleState::Created,
                observers: Vec::new(),
            }),
        }
    }

    /// Returns the wrapped component.
    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    /// Returns the current state.
    pub fn state(&self) -> LifecycleState {
        self.inner.read().unwrap().state
    }

    /// Registers an observer for subsequent state changes.
    ///
    /// Observers are not called retroactively for changes that happened before they were registered.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(LifecycleState, LifecycleState) -> Result<(), GenericError> + Send + Sync + 'static,
    {
        self.inner.write().unwrap().observers.push(Arc::new(observer));
    }

    /// Sets the current state, notifying observers if it changed.
    ///
    /// The new state is committed before any observer runs, and observers run without any lock held.
    pub fn set_state(&self, state: LifecycleState) -> Transition {
        let (from, observers) = {
            let mut inner = self.inner.write().unwrap();
            let from = std::mem::replace(&mut inner.state, state);
            (from, inner.observers.clone())
        };

        let mut transition = Transition {
            from,
            to: state,
            notified: 0,
            failures: Vec::new(),
        };
        if !transition.changed() {
            return transition;
        }

        let component_id = self.component.id();
        debug!(component_id, from = %from, to = %state, "Lifecycle state changed.");
        counter!("armature.lifecycle.transitions", "component_id" => component_id.to_string()).increment(1);

        for (index, observer) in observers.iter().enumerate() {
            transition.notified += 1;

            let reason = match catch_unwind(AssertUnwindSafe(|| observer(from, state))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    warn!(component_id, observer = index, error = %e, "Lifecycle observer failed.");
                    ObserverFailureReason::Error(e)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(component_id, observer = index, panic = %message, "Lifecycle observer panicked.");
                    ObserverFailureReason::Panicked(message)
                }
            };

            counter!("armature.lifecycle.observer_failures", "component_id" => component_id.to_string()).increment(1);
            transition.failures.push(ObserverFailure { index, reason });
        }

        transition
    }

    /// Marks the component as active.
    pub fn activate(&self) -> Transition {
        self.set_state(LifecycleState::Active)
    }

    /// Marks the component as failed.
    pub fn fail(&self) -> Transition {
        self.set_state(LifecycleState::Failed)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

impl Component for LifecycleAware {
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
        self.set_state(LifecycleState::Initializing);
        match self.component.initialize(ctx, env) {
            Ok(()) => {
                self.set_state(LifecycleState::Initialized);
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    fn dispose(&self) -> Result<(), GenericError> {
        // Disposing twice is a no-op, like it is for the wrapped component.
        if self.state() == LifecycleState::Disposed {
            return Ok(());
        }

        self.set_state(LifecycleState::Disposing);
        match self.component.dispose() {
            Ok(()) => {
                self.set_state(LifecycleState::Disposed);
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    fn role(&self) -> Role<'_> {
        self.component.role()
    }

    fn declared_dependencies(&self) -> Option<Vec<ComponentId>> {
        self.component.declared_dependencies()
    }
}
