//! In-process plugins.
//!
//! A [`Plugin`] is a bundle of components that registers itself into a [`Registry`] when loaded, and tears down
//! whatever it started when unloaded. [`PluginManager`] keeps track of which plugins are known and which are loaded.

use std::sync::{Arc, Mutex};

use armature_error::GenericError;
use indexmap::IndexMap;
use snafu::Snafu;
use tracing::{debug, warn};

use crate::{context::Context, registry::Registry};

/// Plugin errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PluginError {
    /// A plugin with the same identifier has already been added.
    #[snafu(display("Plugin '{}' already exists.", plugin_id))]
    AlreadyExists {
        /// The conflicting identifier.
        plugin_id: String,
    },

    /// No plugin has been added under the given identifier.
    #[snafu(display("Plugin '{}' not found.", plugin_id))]
    NotFound {
        /// The identifier that was looked up.
        plugin_id: String,
    },

    /// The plugin failed to load.
    #[snafu(display("Failed to load plugin '{}': {}", plugin_id, source))]
    LoadFailed {
        /// The plugin identifier.
        plugin_id: String,

        /// The error returned by the plugin.
        source: GenericError,
    },

    /// The plugin failed to unload.
    #[snafu(display("Failed to unload plugin '{}': {}", plugin_id, source))]
    UnloadFailed {
        /// The plugin identifier.
        plugin_id: String,

        /// The error returned by the plugin.
        source: GenericError,
    },
}

impl PluginError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "plugin.already_exists",
            Self::NotFound { .. } => "plugin.not_found",
            Self::LoadFailed { .. } => "plugin.load_failed",
            Self::UnloadFailed { .. } => "plugin.unload_failed",
        }
    }
}

/// A plugin.
pub trait Plugin: Send + Sync {
    /// Returns the plugin identifier.
    fn id(&self) -> &str;

    /// Returns the human-readable plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version.
    fn version(&self) -> &str;

    /// Loads the plugin, registering its components in the given registry.
    ///
    /// # Errors
    ///
    /// If the plugin cannot be loaded, an error is returned.
    fn load(&self, ctx: &Context, registry: &Registry) -> Result<(), GenericError>;

    /// Unloads the plugin, stopping any service it started.
    ///
    /// # Errors
    ///
    /// If the plugin cannot be unloaded cleanly, an error is returned.
    fn unload(&self, ctx: &Context) -> Result<(), GenericError>;
}

#[derive(Default)]
struct Inner {
    plugins: IndexMap<String, Arc<dyn Plugin>>,
    loaded: Vec<String>,
}

/// Tracks plugins and their load state.
///
/// Plugins load in the order they were added, and unload in the reverse of the order they were loaded in. The manager
/// holds its lock while calling into a plugin, so plugins must not call back into the manager from `load` or `unload`.
pub struct PluginManager {
    registry: Registry,
    inner: Mutex<Inner>,
}

impl PluginManager {
    /// Creates a new `PluginManager` that loads plugins into the given registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Adds a plugin without loading it.
    ///
    /// # Errors
    ///
    /// If a plugin with the same identifier has already been added, an error is returned.
    pub fn add(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.plugins.contains_key(plugin.id()) {
            return Err(PluginError::AlreadyExists {
                plugin_id: plugin.id().to_string(),
            });
        }

        debug!(plugin_id = plugin.id(), plugin_version = plugin.version(), "Added plugin.");
        inner.plugins.insert(plugin.id().to_string(), plugin);
        Ok(())
    }

    /// Loads the given plugin.
    ///
    /// Loading a plugin that is already loaded is a no-op.
    ///
    /// # Errors
    ///
    /// If the plugin was never added, or it fails to load, an error is returned.
    pub fn load(&self, ctx: &Context, plugin_id: &str) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().unwrap();
        self.load_locked(&mut inner, ctx, plugin_id)
    }

    /// Loads every plugin that isn't loaded yet, in the order they were added.
    ///
    /// # Errors
    ///
    /// Loading stops at the first plugin that fails, and its error is returned. Plugins loaded before it stay loaded.
    pub fn load_all(&self, ctx: &Context) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().unwrap();
        let plugin_ids = inner.plugins.keys().cloned().collect::<Vec<_>>();
        for plugin_id in plugin_ids {
            self.load_locked(&mut inner, ctx, &plugin_id)?;
        }
        Ok(())
    }

    /// Unloads the given plugin.
    ///
    /// Unloading a plugin that isn't loaded is a no-op.
    ///
    /// # Errors
    ///
    /// If the plugin was never added, or it fails to unload, an error is returned. The plugin is considered unloaded
    /// either way.
    pub fn unload(&self, ctx: &Context, plugin_id: &str) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().unwrap();
        unload_locked(&mut inner, ctx, plugin_id)
    }

    /// Unloads every loaded plugin, in reverse load order.
    ///
    /// # Errors
    ///
    /// Every loaded plugin is unloaded even if some fail. The first failure is returned.
    pub fn unload_all(&self, ctx: &Context) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().unwrap();

        let mut first_error = None;
        while let Some(plugin_id) = inner.loaded.last().cloned() {
            if let Err(e) = unload_locked(&mut inner, ctx, &plugin_id) {
                warn!(plugin_id = %plugin_id, error = %e, "Failed to unload plugin.");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns `true` if the given plugin is loaded.
    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.inner.lock().unwrap().loaded.iter().any(|id| id == plugin_id)
    }

    /// Returns the identifiers of all added plugins, in the order they were added.
    pub fn list(&self) -> Vec<String> {
        self.inner.lock().unwrap().plugins.keys().cloned().collect()
    }

    /// Returns the identifiers of all loaded plugins, in the order they were loaded.
    pub fn loaded(&self) -> Vec<String> {
        self.inner.lock().unwrap().loaded.clone()
    }

    fn load_locked(&self, inner: &mut Inner, ctx: &Context, plugin_id: &str) -> Result<(), PluginError> {
        let plugin = inner.plugins.get(plugin_id).cloned().ok_or_else(|| PluginError::NotFound {
            plugin_id: plugin_id.to_string(),
        })?;

        if inner.loaded.iter().any(|id| id == plugin_id) {
            return Ok(());
        }

        plugin
            .load(ctx, &self.registry)
            .map_err(|source| PluginError::LoadFailed {
                plugin_id: plugin_id.to_string(),
                source,
            })?;

        debug!(plugin_id, plugin_name = plugin.name(), "Loaded plugin.");
        inner.loaded.push(plugin_id.to_string());
        Ok(())
    }
}

fn unload_locked(inner: &mut Inner, ctx: &Context, plugin_id: &str) -> Result<(), PluginError> {
    let plugin = inner.plugins.get(plugin_id).cloned().ok_or_else(|| PluginError::NotFound {
        plugin_id: plugin_id.to_string(),
    })?;

    let Some(idx) = inner.loaded.iter().position(|id| id == plugin_id) else {
        return Ok(());
    };
    inner.loaded.remove(idx);

    plugin.unload(ctx).map_err(|source| PluginError::UnloadFailed {
        plugin_id: plugin_id.to_string(),
        source,
    })?;

    debug!(plugin_id, "Unloaded plugin.");
    Ok(())
}
