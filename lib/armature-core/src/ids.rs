//! Component identifiers.

use core::fmt;
use std::{borrow::Borrow, ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};

const EMPTY_COMPONENT_ID: &str = "component IDs cannot be empty";

/// A component identifier.
///
/// Identifiers are opaque, non-empty strings. They are cheap to clone, and compare/hash as plain strings, so a
/// `HashMap<ComponentId, _>` can be queried with a `&str`.
#[derive(Clone, Debug, Hash, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(Arc<str>);

impl ComponentId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ComponentId {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(EMPTY_COMPONENT_ID)
        } else {
            Ok(Self(value.into()))
        }
    }
}

impl TryFrom<String> for ComponentId {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(EMPTY_COMPONENT_ID)
        } else {
            Ok(Self(value.into()))
        }
    }
}

impl From<ComponentId> for String {
    fn from(value: ComponentId) -> Self {
        value.0.to_string()
    }
}

impl Deref for ComponentId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ComponentId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ComponentId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
