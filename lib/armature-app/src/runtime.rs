//! Runtime bootstrap.
//!
//! A [`Runtime`] is built from configuration: it constructs the configured components, loads the enabled plugins,
//! checks that every declared dependency resolves, and initializes everything. Services are started in startup order and
//! stopped in the reverse order.

use std::{collections::HashMap, sync::Arc};

use armature_config::{ConfigurationError, GenericConfiguration};
use armature_core::{
    components::{Component, ComponentConfig},
    context::Context,
    dependency::{DependencyAware, DependencyError},
    factory::{ComponentFactory, FactoryError},
    ids::ComponentId,
    plugin::{Plugin, PluginError, PluginManager},
    registry::{Registry, RegistryError},
    system::{System, SystemError},
};
use armature_error::GenericError;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};

/// A runtime error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RuntimeError {
    /// The runtime configuration could not be read.
    #[snafu(display("Invalid runtime configuration: {}", source))]
    InvalidConfiguration {
        /// The underlying configuration error.
        source: ConfigurationError,
    },

    /// A configured component could not be built.
    #[snafu(display("Failed to build component '{}': {}", component_id, source))]
    FailedToBuildComponent {
        /// The configured component identifier.
        component_id: String,

        /// The underlying factory error.
        source: FactoryError,
    },

    /// A configured component could not be registered.
    #[snafu(display("Failed to register component: {}", source))]
    FailedToRegisterComponent {
        /// The underlying registry error.
        source: RegistryError,
    },

    /// An enabled plugin is not compiled into this binary.
    #[snafu(display("Plugin '{}' is enabled but not available.", plugin_id))]
    UnknownPlugin {
        /// The enabled plugin identifier.
        plugin_id: String,
    },

    /// A plugin failed to be added, loaded or unloaded.
    #[snafu(display("{}", source))]
    PluginFailed {
        /// The underlying plugin error.
        source: PluginError,
    },

    /// A declared dependency did not resolve.
    #[snafu(display("Unresolved dependencies for component '{}': {}", component_id, source))]
    UnresolvedDependencies {
        /// The component whose dependencies were resolved.
        component_id: ComponentId,

        /// The underlying dependency error.
        source: DependencyError,
    },

    /// A component failed to initialize or dispose.
    #[snafu(display("Component '{}' failed to {}: {}", component_id, action, source))]
    ComponentFailed {
        /// The component identifier.
        component_id: ComponentId,

        /// What was being done to the component.
        action: &'static str,

        /// The error returned by the component.
        source: GenericError,
    },

    /// A service failed to start or stop.
    #[snafu(display("{}", source))]
    ServiceFailed {
        /// The underlying system error.
        source: SystemError,
    },
}

/// Runtime configuration.
#[derive(Default, Deserialize)]
pub struct RuntimeConfiguration {
    /// Components to build with the component factory.
    ///
    /// Defaults to none.
    #[serde(default)]
    pub components: Vec<ComponentConfig>,

    /// Identifiers of the plugins to load.
    ///
    /// Plugins load in the listed order. Defaults to none.
    #[serde(default)]
    pub plugins: Vec<String>,
}

impl RuntimeConfiguration {
    /// Creates a new `RuntimeConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `RuntimeConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, RuntimeError> {
        config.as_typed().context(InvalidConfiguration)
    }
}

/// A bootstrapped set of components.
pub struct Runtime {
    system: System,
    plugins: PluginManager,
    startup_order: Vec<ComponentId>,
}

impl Runtime {
    /// Builds a runtime from the given configuration.
    ///
    /// `available_plugins` are the plugins compiled into the binary: only the ones named in the configuration are
    /// loaded.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or any component fails to build, register, resolve its dependencies, or
    /// initialize, or any plugin fails to load, an error is returned. Plugins loaded before the failure are unloaded,
    /// and components initialized before it are disposed.
    pub fn from_configuration(
        config: &GenericConfiguration, factory: &ComponentFactory, available_plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Self, RuntimeError> {
        let runtime_config = RuntimeConfiguration::from_configuration(config)?;
        Self::from_runtime_configuration(runtime_config, factory, available_plugins)
    }

    /// Builds a runtime from an already-deserialized configuration.
    ///
    /// Configured components start first, in the order they were listed, followed by any components registered by
    /// plugins, ordered by identifier.
    ///
    /// # Errors
    ///
    /// See [`from_configuration`][Self::from_configuration].
    pub fn from_runtime_configuration(
        runtime_config: RuntimeConfiguration, factory: &ComponentFactory, available_plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Self, RuntimeError> {
        let ctx = Context::background();
        let registry = Registry::new();
        let system = System::new(registry.clone());
        let plugins = PluginManager::new(registry.clone());

        for component_config in &runtime_config.components {
            let component = factory.create(component_config).context(FailedToBuildComponent {
                component_id: component_config.id.clone(),
            })?;
            registry.register(component).context(FailedToRegisterComponent)?;
        }

        let mut available_plugins = available_plugins
            .into_iter()
            .map(|plugin| (plugin.id().to_string(), plugin))
            .collect::<HashMap<_, _>>();
        for plugin_id in &runtime_config.plugins {
            let plugin = available_plugins
                .remove(plugin_id)
                .ok_or_else(|| RuntimeError::UnknownPlugin {
                    plugin_id: plugin_id.clone(),
                })?;
            plugins.add(plugin).context(PluginFailed)?;
        }

        let mut runtime = Self {
            system,
            plugins,
            startup_order: Vec::new(),
        };

        let mut initialized = Vec::new();
        if let Err(e) = runtime.bootstrap(&ctx, &runtime_config.components, &mut initialized) {
            runtime.abort(&ctx, &initialized);
            return Err(e);
        }

        info!(
            components = runtime.startup_order.len(),
            plugins = runtime.plugins.loaded().len(),
            "Runtime initialized."
        );

        Ok(runtime)
    }

    /// Returns the system façade.
    pub fn system(&self) -> &System {
        &self.system
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Registry {
        self.system.registry()
    }

    /// Returns the plugin manager.
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Returns the order in which components are initialized and services started.
    pub fn startup_order(&self) -> &[ComponentId] {
        &self.startup_order
    }

    /// Starts the system, and then every service in startup order.
    ///
    /// # Errors
    ///
    /// Starting stops at the first service that fails, and its error is returned. Services started before it keep
    /// running until [`shutdown`][Self::shutdown].
    pub fn start(&self, ctx: &Context) -> Result<(), RuntimeError> {
        self.system.start(ctx);

        for component_id in self.service_ids() {
            self.system.start_service(ctx, &component_id).context(ServiceFailed)?;
        }

        info!(services = self.service_ids().len(), "Runtime started.");
        Ok(())
    }

    /// Stops every service in reverse startup order, unloads plugins, disposes every component in reverse startup
    /// order, and then stops the system.
    ///
    /// # Errors
    ///
    /// Every step runs even if earlier ones fail. The first failure is returned.
    pub fn shutdown(&self, ctx: &Context) -> Result<(), RuntimeError> {
        let mut first_error = None;

        for component_id in self.service_ids().iter().rev() {
            if let Err(e) = self.system.stop_service(ctx, component_id) {
                warn!(component_id = %component_id, error = %e, "Failed to stop service.");
                first_error.get_or_insert(RuntimeError::ServiceFailed { source: e });
            }
        }

        if let Err(e) = self.plugins.unload_all(ctx) {
            first_error.get_or_insert(RuntimeError::PluginFailed { source: e });
        }

        // Plugins may have unregistered their own components while unloading.
        for component_id in self.startup_order.iter().rev() {
            let Ok(component) = self.registry().get(component_id) else {
                continue;
            };

            if let Err(e) = component.dispose() {
                warn!(component_id = %component_id, error = %e, "Failed to dispose component.");
                first_error.get_or_insert(RuntimeError::ComponentFailed {
                    component_id: component_id.clone(),
                    action: "dispose",
                    source: e,
                });
            }
        }

        self.system.stop(ctx);
        info!("Runtime stopped.");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn components(&self) -> impl Iterator<Item = (&ComponentId, Arc<dyn Component>)> + '_ {
        self.startup_order
            .iter()
            .filter_map(|component_id| self.registry().get(component_id).ok().map(|c| (component_id, c)))
    }

    fn service_ids(&self) -> Vec<ComponentId> {
        self.components()
            .filter(|(_, component)| component.role().as_service().is_some())
            .map(|(component_id, _)| component_id.clone())
            .collect()
    }

    fn check_dependencies(&self) -> Result<(), RuntimeError> {
        for (component_id, component) in self.components() {
            let Some(dependencies) = component.declared_dependencies() else {
                continue;
            };

            let resolved = DependencyAware::with_dependencies(component, dependencies)
                .resolve_dependencies(self.registry())
                .context(UnresolvedDependencies {
                    component_id: component_id.clone(),
                })?;
            debug!(component_id = %component_id, dependencies = resolved.len(), "Dependencies resolved.");
        }

        Ok(())
    }

    fn bootstrap(
        &mut self, ctx: &Context, configured: &[ComponentConfig], initialized: &mut Vec<ComponentId>,
    ) -> Result<(), RuntimeError> {
        self.plugins.load_all(ctx).context(PluginFailed)?;
        self.startup_order = startup_order(self.registry(), configured);

        self.check_dependencies()?;
        self.initialize_components(ctx, initialized)
    }

    fn initialize_components(&self, ctx: &Context, initialized: &mut Vec<ComponentId>) -> Result<(), RuntimeError> {
        let env = self.system.environment();
        for (component_id, component) in self.components() {
            component.initialize(ctx, &env).context(ComponentFailed {
                component_id: component_id.clone(),
                action: "initialize",
            })?;
            initialized.push(component_id.clone());
        }

        Ok(())
    }

    // Undoes a partial bootstrap: unloads whatever plugins got loaded and disposes the components initialized so far.
    fn abort(&self, ctx: &Context, initialized: &[ComponentId]) {
        if let Err(e) = self.plugins.unload_all(ctx) {
            warn!(error = %e, "Failed to unload plugins after bootstrap failure.");
        }

        for component_id in initialized.iter().rev() {
            let Ok(component) = self.registry().get(component_id) else {
                continue;
            };

            if let Err(e) = component.dispose() {
                warn!(component_id = %component_id, error = %e, "Failed to dispose component after bootstrap failure.");
            }
        }
    }
}

fn startup_order(registry: &Registry, configured: &[ComponentConfig]) -> Vec<ComponentId> {
    let mut remaining = registry.list();
    remaining.sort();

    let mut order = Vec::with_capacity(remaining.len());
    for config in configured {
        if let Some(idx) = remaining.iter().position(|id| id.as_str() == config.id) {
            order.push(remaining.remove(idx));
        }
    }
    order.extend(remaining);
    order
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write as _,
        sync::{
            atomic::{AtomicBool, Ordering::SeqCst},
            Mutex,
        },
    };

    use armature_config::ConfigurationLoader;
    use armature_core::{
        components::{BaseComponent, BaseService, ComponentType, Metadata, ServiceStatus},
        context::Environment,
    };
    use armature_error::generic_error;
    use serde_json::json;

    use super::*;

    struct CachePlugin;

    impl Plugin for CachePlugin {
        fn id(&self) -> &str {
            "cache"
        }

        fn name(&self) -> &str {
            "Cache"
        }

        fn version(&self) -> &str {
            "0.3.0"
        }

        fn load(&self, _ctx: &Context, registry: &Registry) -> Result<(), GenericError> {
            let warmer = Arc::new(BaseService::new(ComponentConfig::new("cache-warmer", ComponentType::Service)));
            registry.register(Arc::new(DependencyAware::with_dependencies(warmer, ["db-conn"])))?;
            registry.register(Arc::new(BaseService::new(ComponentConfig::new(
                "cache-evictor",
                ComponentType::Service,
            ))))?;
            Ok(())
        }

        fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
            Ok(())
        }
    }

    struct BrokenPlugin;

    impl Plugin for BrokenPlugin {
        fn id(&self) -> &str {
            "broken"
        }

        fn name(&self) -> &str {
            "Broken"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        fn load(&self, _ctx: &Context, _registry: &Registry) -> Result<(), GenericError> {
            Err(generic_error!("missing shared library"))
        }

        fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
            Ok(())
        }
    }

    // Component whose initialization always fails.
    struct ColdStorage {
        base: BaseComponent,
    }

    impl Component for ColdStorage {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn name(&self) -> &str {
            self.base.name()
        }

        fn description(&self) -> &str {
            self.base.description()
        }

        fn version(&self) -> &str {
            self.base.version()
        }

        fn component_type(&self) -> ComponentType {
            self.base.component_type()
        }

        fn metadata(&self) -> Metadata {
            self.base.metadata()
        }

        fn set_metadata(&self, key: &str, value: serde_json::Value) {
            self.base.set_metadata(key, value)
        }

        fn initialize(&self, _ctx: &Context, _env: &Environment) -> Result<(), GenericError> {
            Err(generic_error!("bucket not mounted"))
        }

        fn dispose(&self) -> Result<(), GenericError> {
            self.base.dispose()
        }
    }

    /// Registers `archive` (depending on `archive_dependency`) and records whether it was unloaded.
    struct ArchivePlugin {
        archive_dependency: &'static str,
        failing_initialize: bool,
        registry: Mutex<Option<Registry>>,
        unloaded: AtomicBool,
    }

    impl ArchivePlugin {
        fn new(archive_dependency: &'static str, failing_initialize: bool) -> Arc<Self> {
            Arc::new(Self {
                archive_dependency,
                failing_initialize,
                registry: Mutex::new(None),
                unloaded: AtomicBool::new(false),
            })
        }

        fn registry(&self) -> Registry {
            self.registry.lock().unwrap().clone().unwrap()
        }
    }

    impl Plugin for ArchivePlugin {
        fn id(&self) -> &str {
            "archive"
        }

        fn name(&self) -> &str {
            "Archive"
        }

        fn version(&self) -> &str {
            "1.2.0"
        }

        fn load(&self, _ctx: &Context, registry: &Registry) -> Result<(), GenericError> {
            let config = ComponentConfig::new("archive", ComponentType::Basic);
            let archive: Arc<dyn Component> = if self.failing_initialize {
                Arc::new(ColdStorage {
                    base: BaseComponent::new(config),
                })
            } else {
                Arc::new(BaseComponent::new(config))
            };
            registry.register(Arc::new(DependencyAware::with_dependencies(
                archive,
                [self.archive_dependency],
            )))?;

            *self.registry.lock().unwrap() = Some(registry.clone());
            Ok(())
        }

        fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
            self.unloaded.store(true, SeqCst);
            Ok(())
        }
    }

    fn available_plugins() -> Vec<Arc<dyn Plugin>> {
        vec![Arc::new(CachePlugin), Arc::new(BrokenPlugin)]
    }

    fn config_from_yaml(yaml: &str) -> GenericConfiguration {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_generic()
    }

    const RUNTIME_YAML: &str = r#"
log_level: debug
components:
  - id: db-conn
    type: service
    properties:
      pool_size: 8
  - id: settings
    type: basic
  - id: query
    type: operation
    dependencies: [db-conn]
plugins: [cache]
"#;

    fn status(runtime: &Runtime, component_id: &str) -> ServiceStatus {
        let component = runtime.registry().get(component_id).unwrap();
        let status = component.role().as_service().map(|s| s.status());
        status.unwrap()
    }

    #[test]
    fn empty_configuration() {
        let runtime = Runtime::from_configuration(
            &config_from_yaml("log_level: info\n"),
            &ComponentFactory::new(),
            available_plugins(),
        )
        .unwrap();

        assert!(runtime.startup_order().is_empty());
        assert!(runtime.plugins().list().is_empty());
        runtime.start(&Context::background()).unwrap();
        runtime.shutdown(&Context::background()).unwrap();
    }

    #[test]
    fn bootstrap_start_and_shutdown() {
        let runtime =
            Runtime::from_configuration(&config_from_yaml(RUNTIME_YAML), &ComponentFactory::new(), available_plugins())
                .unwrap();

        let order = runtime.startup_order().iter().map(|id| id.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["db-conn", "settings", "query", "cache-evictor", "cache-warmer"]);
        assert_eq!(runtime.plugins().loaded(), vec!["cache".to_string()]);

        let db = runtime.registry().get("db-conn").unwrap();
        assert_eq!(db.metadata().get("initialized"), Some(&json!(true)));
        assert_eq!(db.metadata().get("pool_size"), Some(&json!(8)));

        let ctx = Context::background();
        runtime.start(&ctx).unwrap();
        assert!(runtime.system().is_running());
        for service in ["db-conn", "cache-evictor", "cache-warmer"] {
            assert_eq!(status(&runtime, service), ServiceStatus::Running);
        }

        let output = runtime
            .system()
            .execute_operation(&ctx, "query", Default::default())
            .unwrap();
        assert_eq!(output.data, json!(null));

        runtime.shutdown(&ctx).unwrap();
        assert!(!runtime.system().is_running());
        assert!(runtime.plugins().loaded().is_empty());
        for service in ["db-conn", "cache-evictor", "cache-warmer"] {
            assert_eq!(status(&runtime, service), ServiceStatus::Stopped);
        }
        assert!(db.metadata().is_empty());
    }

    #[test]
    fn unknown_plugin() {
        let config = RuntimeConfiguration {
            plugins: vec!["telemetry".to_string()],
            ..Default::default()
        };

        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), available_plugins())
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::UnknownPlugin { ref plugin_id } if plugin_id == "telemetry"));
    }

    #[test]
    fn plugin_load_failure() {
        let config = RuntimeConfiguration {
            plugins: vec!["cache".to_string(), "broken".to_string()],
            components: vec![ComponentConfig::new("db-conn", ComponentType::Service)],
        };

        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), available_plugins())
            .err()
            .unwrap();
        match err {
            RuntimeError::PluginFailed { source } => assert_eq!(source.code(), "plugin.load_failed"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn unsupported_component_type() {
        let config = config_from_yaml("components:\n  - id: app\n    type: application\n");

        let err = Runtime::from_configuration(&config, &ComponentFactory::new(), Vec::new())
            .err()
            .unwrap();
        match err {
            RuntimeError::FailedToBuildComponent { component_id, source } => {
                assert_eq!(component_id, "app");
                assert_eq!(source.code(), "factory.unsupported_type");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn duplicate_component() {
        let config = RuntimeConfiguration {
            components: vec![
                ComponentConfig::new("db-conn", ComponentType::Service),
                ComponentConfig::new("db-conn", ComponentType::Basic),
            ],
            ..Default::default()
        };

        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), Vec::new())
            .err()
            .unwrap();
        match err {
            RuntimeError::FailedToRegisterComponent { source } => {
                assert_eq!(source.code(), "registry.item_already_exists")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn missing_dependency() {
        // `cache-warmer` depends on `db-conn`, which isn't configured.
        let config = RuntimeConfiguration {
            plugins: vec!["cache".to_string()],
            ..Default::default()
        };

        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), available_plugins())
            .err()
            .unwrap();
        match err {
            RuntimeError::UnresolvedDependencies { component_id, source } => {
                assert_eq!(component_id.as_str(), "cache-warmer");
                assert_eq!(source.code(), "dependency.resolution_failed");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn circular_dependency() {
        let config = config_from_yaml(
            "components:\n  - id: a\n    dependencies: [b]\n  - id: b\n    dependencies: [a]\n",
        );

        let err = Runtime::from_configuration(&config, &ComponentFactory::new(), Vec::new())
            .err()
            .unwrap();
        match err {
            RuntimeError::UnresolvedDependencies { source, .. } => {
                assert_eq!(source.code(), "dependency.circular_dependency")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn invalid_configuration() {
        let config = config_from_yaml("plugins: not-a-list\n");

        let err = Runtime::from_configuration(&config, &ComponentFactory::new(), Vec::new())
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::InvalidConfiguration { .. }));
    }

    #[test]
    fn unresolved_dependency_unloads_plugins() {
        let archive = ArchivePlugin::new("ghost", false);
        let config = RuntimeConfiguration {
            plugins: vec!["archive".to_string()],
            ..Default::default()
        };

        let plugins = vec![archive.clone() as Arc<dyn Plugin>];
        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), plugins)
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::UnresolvedDependencies { .. }));
        assert!(archive.unloaded.load(SeqCst));
    }

    #[test]
    fn failed_initialize_disposes_initialized_components() {
        let archive = ArchivePlugin::new("db-conn", true);
        let config = RuntimeConfiguration {
            components: vec![ComponentConfig::new("db-conn", ComponentType::Service)],
            plugins: vec!["archive".to_string()],
        };

        let plugins = vec![archive.clone() as Arc<dyn Plugin>];
        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), plugins)
            .err()
            .unwrap();
        match err {
            RuntimeError::ComponentFailed { component_id, action, .. } => {
                assert_eq!(component_id.as_str(), "archive");
                assert_eq!(action, "initialize");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(archive.unloaded.load(SeqCst));

        // `db-conn` initialized before `archive` failed, and was disposed again.
        let db = archive.registry().get("db-conn").unwrap();
        assert!(db.metadata().get("initialized").is_none());
    }

    #[test]
    fn plugin_load_failure_unloads_loaded_plugins() {
        let archive = ArchivePlugin::new("db-conn", false);
        let config = RuntimeConfiguration {
            components: vec![ComponentConfig::new("db-conn", ComponentType::Service)],
            plugins: vec!["archive".to_string(), "broken".to_string()],
        };

        let plugins: Vec<Arc<dyn Plugin>> = vec![archive.clone(), Arc::new(BrokenPlugin)];
        let err = Runtime::from_runtime_configuration(config, &ComponentFactory::new(), plugins)
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::PluginFailed { .. }));
        assert!(archive.unloaded.load(SeqCst));
    }
}
