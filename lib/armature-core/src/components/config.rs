use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{ComponentType, Metadata};

/// Version assigned to components that don't declare one.
pub const DEFAULT_COMPONENT_VERSION: &str = "1.0.0";

fn default_version() -> String {
    DEFAULT_COMPONENT_VERSION.to_string()
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let version = String::deserialize(deserializer)?;
    if version.is_empty() {
        Ok(default_version())
    } else {
        Ok(version)
    }
}

/// Construction-time description of a component.
///
/// A `ComponentConfig` is consumed by a factory (or directly by one of the base component constructors) to build a
/// component. Entries in `properties` are merged into the component's metadata at creation time.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ComponentConfig {
    /// Component identifier.
    pub id: String,

    /// Human-readable name.
    ///
    /// Defaults to the identifier when empty.
    #[serde(default)]
    pub name: String,

    /// Component type.
    #[serde(default, rename = "type")]
    pub component_type: ComponentType,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Component version.
    #[serde(default = "default_version", deserialize_with = "deserialize_version")]
    pub version: String,

    /// Identifiers of the components this component depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Properties merged into the component metadata.
    #[serde(default)]
    pub properties: Metadata,
}

impl ComponentConfig {
    /// Creates a new `ComponentConfig` with the given identifier and type, and defaults for everything else.
    pub fn new<S: Into<String>>(id: S, component_type: ComponentType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            component_type,
            description: String::new(),
            version: default_version(),
            dependencies: Vec::new(),
            properties: Metadata::new(),
        }
    }

    /// Sets the name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the version.
    ///
    /// An empty version is replaced with [`DEFAULT_COMPONENT_VERSION`].
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        let version = version.into();
        self.version = if version.is_empty() { default_version() } else { version };
        self
    }

    /// Adds a dependency.
    pub fn with_dependency<S: Into<String>>(mut self, dependency: S) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Sets a property.
    pub fn with_property<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub(crate) fn effective_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub(crate) fn effective_version(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_COMPONENT_VERSION
        } else {
            &self.version
        }
    }
}
