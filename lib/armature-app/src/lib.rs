//! Application scaffolding for Armature-based programs.
//!
//! This covers the parts every binary needs before it can do anything useful: setting up logging, and assembling a
//! runtime (registry, plugins, and components) from configuration.
#![deny(missing_docs)]

pub mod logging;
pub mod runtime;
