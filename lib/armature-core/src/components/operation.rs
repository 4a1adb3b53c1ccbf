use armature_error::GenericError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BaseComponent, Component, ComponentConfig, ComponentType, Metadata, Role};
use crate::context::{Context, Environment};

/// Input to an operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationInput {
    /// Operation payload.
    pub data: Value,

    /// Caller-supplied annotations.
    #[serde(default)]
    pub metadata: Metadata,
}

impl OperationInput {
    /// Creates a new `OperationInput` with the given payload.
    pub fn new<V: Into<Value>>(data: V) -> Self {
        Self {
            data: data.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Output of an operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOutput {
    /// Operation result payload.
    pub data: Value,

    /// Annotations produced by the operation.
    #[serde(default)]
    pub metadata: Metadata,
}

impl OperationOutput {
    /// Creates a new `OperationOutput` with the given payload.
    pub fn new<V: Into<Value>>(data: V) -> Self {
        Self {
            data: data.into(),
            metadata: Metadata::new(),
        }
    }
}

/// A component that can be executed.
///
/// Executing an operation must not change the state of the operation component itself: any side effects belong to the
/// concrete implementation and whatever it talks to.
pub trait Operation: Component {
    /// Executes the operation.
    ///
    /// # Errors
    ///
    /// If the operation fails, an error is returned.
    fn execute(&self, ctx: &Context, input: OperationInput) -> Result<OperationOutput, GenericError>;
}

/// The base operation.
///
/// Executing a `BaseOperation` returns the input payload unchanged.
pub struct BaseOperation {
    component: BaseComponent,
}

impl BaseOperation {
    /// Creates a new `BaseOperation` from the given configuration.
    pub fn new(config: ComponentConfig) -> Self {
        Self {
            component: BaseComponent::new(config),
        }
    }

    /// Returns the embedded base component.
    pub fn base(&self) -> &BaseComponent {
        &self.component
    }
}

impl Component for BaseOperation {
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
        Role::Operation(self)
    }
}

impl Operation for BaseOperation {
    fn execute(&self, _ctx: &Context, input: OperationInput) -> Result<OperationOutput, GenericError> {
        Ok(OperationOutput::new(input.data))
    }
}
