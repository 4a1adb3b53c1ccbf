//! Core primitives for building applications out of pluggable components.
//!
//! The [`Registry`][registry::Registry] maps identifiers to [components][components::Component]. Components can be
//! decorated with an observable lifecycle ([`LifecycleAware`][lifecycle::LifecycleAware]) or a declared dependency set
//! ([`DependencyAware`][dependency::DependencyAware]), built from configuration by a
//! [`ComponentFactory`][factory::ComponentFactory], bundled into [plugins][plugin::Plugin], and driven through the
//! [`System`][system::System] façade.
#![deny(missing_docs)]

pub mod components;
pub mod context;
pub mod dependency;
pub mod factory;
pub mod ids;
pub mod lifecycle;
pub mod plugin;
pub mod registry;
pub mod system;
