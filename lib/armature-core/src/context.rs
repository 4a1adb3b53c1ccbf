//! Call context and injected collaborators.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;

use crate::{components::Metadata, registry::Registry};

/// An opaque call context.
///
/// A context is threaded through `initialize`, `start`, `stop`, and `execute`. It carries an optional deadline and a
/// bag of request-scoped values, neither of which are interpreted by the runtime itself: they exist purely for the
/// benefit of component implementations and the code calling into them.
///
/// Contexts are cheap to clone, and derived contexts (`with_deadline`, `with_value`) never modify their parent.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    values: Arc<HashMap<String, Value>>,
}

impl Context {
    /// Creates an empty context with no deadline and no values.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a copy of this context with the given deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            values: Arc::clone(&self.values),
        }
    }

    /// Returns a copy of this context with a deadline `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a copy of this context with the given key set to `value`.
    pub fn with_value<K, V>(&self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut values = HashMap::clone(&self.values);
        values.insert(key.into(), value.into());

        Self {
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }

    /// Returns the deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` if a deadline was set and has already passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the value stored under `key`, if any.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Collaborators handed to a component when it is initialized.
///
/// Components receive everything they need from their surroundings through this struct, rather than holding on to a
/// reference to the enclosing system.
#[derive(Clone, Default)]
pub struct Environment {
    registry: Registry,
    properties: Metadata,
}

impl Environment {
    /// Creates a new `Environment` around the given registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            properties: Metadata::new(),
        }
    }

    /// Sets a runtime-wide property.
    pub fn with_property<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the registry that components can use to look up their peers.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the runtime-wide property stored under `key`, if any.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Returns all runtime-wide properties.
    pub fn properties(&self) -> &Metadata {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_contexts_leave_parent_untouched() {
        let parent = Context::background().with_value("request_id", "abc");
        let child = parent.with_value("attempt", 2);

        assert_eq!(parent.value("attempt"), None);
        assert_eq!(child.value("attempt"), Some(&Value::from(2)));
        assert_eq!(child.value("request_id"), Some(&Value::from("abc")));
    }

    #[test]
    fn deadline_expiry() {
        let ctx = Context::background();
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_expired());

        let expired = ctx.with_timeout(Duration::ZERO);
        assert!(expired.is_expired());

        let later = ctx.with_timeout(Duration::from_secs(60));
        assert!(!later.is_expired());
    }

    #[test]
    fn environment_properties() {
        let env = Environment::new(Registry::new()).with_property("region", "eu-west-1");
        assert_eq!(env.property("region"), Some(&Value::from("eu-west-1")));
        assert_eq!(env.registry().count(), 0);
    }
}
