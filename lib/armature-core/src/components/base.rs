use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{AcqRel, Acquire},
        },
        RwLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use armature_error::GenericError;
use serde_json::Value;
use tracing::debug;

use super::{Component, ComponentConfig, ComponentType, Metadata};
use crate::context::{Context, Environment};

const INITIALIZED_KEY: &str = "initialized";
const INITIALIZED_AT_KEY: &str = "initialized_at";

/// The base component.
///
/// `BaseComponent` implements the identity and bookkeeping parts of [`Component`], and is meant to be embedded in
/// concrete components that delegate to it.
pub struct BaseComponent {
    id: String,
    name: String,
    description: String,
    version: String,
    component_type: ComponentType,
    metadata: RwLock<Metadata>,
    initialized: AtomicBool,
}

impl BaseComponent {
    /// Creates a new `BaseComponent` from the given configuration.
    ///
    /// The configuration's properties are copied into the component metadata.
    pub fn new(config: ComponentConfig) -> Self {
        let name = config.effective_name().to_string();
        let version = config.effective_version().to_string();

        Self {
            id: config.id,
            name,
            description: config.description,
            version,
            component_type: config.component_type,
            metadata: RwLock::new(config.properties),
            initialized: AtomicBool::new(false),
        }
    }

    /// Returns `true` if the component has been initialized and not disposed since.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Acquire)
    }
}

impl Component for BaseComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn component_type(&self) -> ComponentType {
        self.component_type
    }

    fn metadata(&self) -> Metadata {
        self.metadata.read().unwrap().clone()
    }

    fn set_metadata(&self, key: &str, value: Value) {
        self.metadata.write().unwrap().insert(key.to_string(), value);
    }

    fn initialize(&self, _ctx: &Context, _env: &Environment) -> Result<(), GenericError> {
        // Only the first caller records the bookkeeping entries.
        if self.initialized.swap(true, AcqRel) {
            return Ok(());
        }

        let initialized_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut metadata = self.metadata.write().unwrap();
        metadata.insert(INITIALIZED_KEY.to_string(), Value::Bool(true));
        metadata.insert(INITIALIZED_AT_KEY.to_string(), Value::from(initialized_at));

        debug!(component_id = %self.id, component_type = %self.component_type, "Initialized component.");

        Ok(())
    }

    fn dispose(&self) -> Result<(), GenericError> {
        self.metadata.write().unwrap().clear();
        if self.initialized.swap(false, AcqRel) {
            debug!(component_id = %self.id, "Disposed component.");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> BaseComponent {
        BaseComponent::new(
            ComponentConfig::new("cfg", ComponentType::Basic)
                .with_description("configuration holder")
                .with_property("source", "env"),
        )
    }

    #[test]
    fn identity_from_config() {
        let component = component();

        assert_eq!(component.id(), "cfg");
        assert_eq!(component.name(), "cfg");
        assert_eq!(component.description(), "configuration holder");
        assert_eq!(component.version(), "1.0.0");
        assert_eq!(component.component_type(), ComponentType::Basic);
        assert_eq!(component.metadata().get("source"), Some(&Value::from("env")));
    }

    #[test]
    fn metadata_returns_a_copy() {
        let component = component();

        let mut copy = component.metadata();
        copy.insert("injected".to_string(), Value::Bool(true));
        copy.remove("source");

        let fresh = component.metadata();
        assert!(!fresh.contains_key("injected"));
        assert!(fresh.contains_key("source"));
    }

    #[test]
    fn initialize_records_bookkeeping_once() {
        let component = component();
        let ctx = Context::background();
        let env = Environment::default();

        component.initialize(&ctx, &env).unwrap();
        assert!(component.is_initialized());
        let first = component.metadata();
        assert_eq!(first.get(INITIALIZED_KEY), Some(&Value::Bool(true)));
        assert!(first.contains_key(INITIALIZED_AT_KEY));

        // A second call is a successful no-op.
        component.set_metadata(INITIALIZED_AT_KEY, Value::from(0));
        component.initialize(&ctx, &env).unwrap();
        assert_eq!(component.metadata().get(INITIALIZED_AT_KEY), Some(&Value::from(0)));
    }

    #[test]
    fn dispose_is_idempotent_and_safe_without_initialize() {
        let component = component();

        component.dispose().unwrap();
        component.dispose().unwrap();
        assert!(component.metadata().is_empty());
        assert!(!component.is_initialized());

        component.initialize(&Context::background(), &Environment::default()).unwrap();
        component.dispose().unwrap();
        assert!(component.metadata().is_empty());
        assert!(!component.is_initialized());
    }
}
