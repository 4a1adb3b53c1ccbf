//! Deserialization helpers for use with `serde_with`.

use std::fmt;

use serde::{
    de::{Error, Unexpected, Visitor},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Permissively deserializes a boolean.
///
/// Configuration that arrives through environment variables or hand-written files tends to spell booleans in many
/// ways. This accepts:
///
/// - native booleans
/// - `"true"`/`"false"`, `"yes"`/`"no"`, and `"on"`/`"off"` as strings (case insensitive)
/// - `1` or `0` as a signed, unsigned, or floating-point number
pub struct PermissiveBool;

struct PermissiveBoolVisitor;

impl Visitor<'_> for PermissiveBoolVisitor {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a boolean, a boolean-like string, or 0/1")
    }

    fn visit_bool<E: Error>(self, value: bool) -> Result<bool, E> {
        Ok(value)
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<bool, E> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Ok(true),
            "false" | "no" | "off" => Ok(false),
            _ => Err(Error::invalid_value(Unexpected::Str(value), &self)),
        }
    }

    fn visit_i64<E: Error>(self, value: i64) -> Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::invalid_value(Unexpected::Signed(value), &"0 or 1")),
        }
    }

    fn visit_u64<E: Error>(self, value: u64) -> Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &"0 or 1")),
        }
    }

    fn visit_f64<E: Error>(self, value: f64) -> Result<bool, E> {
        if value == 0.0 {
            Ok(false)
        } else if value == 1.0 {
            Ok(true)
        } else {
            Err(Error::invalid_value(Unexpected::Float(value), &"0.0 or 1.0"))
        }
    }
}

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PermissiveBoolVisitor)
    }
}
