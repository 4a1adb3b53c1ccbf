//! End-to-end scenarios across the registry, wrappers, plugins, and the system façade.

use std::sync::{
    atomic::{AtomicUsize, Ordering::Relaxed},
    Arc, Mutex,
};

use armature_core::{
    components::{
        BaseService, Component, ComponentConfig, ComponentType, Metadata, Role, Service, ServiceStatus,
    },
    context::{Context, Environment},
    dependency::DependencyAware,
    factory::ComponentFactory,
    lifecycle::{LifecycleAware, LifecycleState},
    plugin::{Plugin, PluginManager},
    registry::Registry,
    system::System,
};
use armature_error::{generic_error, GenericError};
use serde_json::{json, Value};
use similar_asserts::assert_eq;

/// A service with its own start/stop hooks, the way a concrete service embeds `BaseService`.
struct ConnectionPool {
    base: BaseService,
    opened: AtomicUsize,
}

impl ConnectionPool {
    fn new(id: &str) -> Self {
        Self {
            base: BaseService::new(ComponentConfig::new(id, ComponentType::Service).with_property("pool_size", 4)),
            opened: AtomicUsize::new(0),
        }
    }
}

impl Component for ConnectionPool {
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

    fn set_metadata(&self, key: &str, value: Value) {
        self.base.set_metadata(key, value)
    }

    fn initialize(&self, ctx: &Context, env: &Environment) -> Result<(), GenericError> {
        self.base.initialize(ctx, env)
    }

    fn dispose(&self) -> Result<(), GenericError> {
        self.base.dispose()
    }

    fn role(&self) -> Role<'_> {
        Role::Service(self)
    }
}

impl Service for ConnectionPool {
    fn start(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.start_with(|| {
            self.opened.fetch_add(1, Relaxed);
            Ok(())
        })
    }

    fn stop(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.stop_with(|| Ok(()))
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn status(&self) -> ServiceStatus {
        self.base.status()
    }
}

struct DatabasePlugin;

impl Plugin for DatabasePlugin {
    fn id(&self) -> &str {
        "database"
    }

    fn name(&self) -> &str {
        "Database"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn load(&self, _ctx: &Context, registry: &Registry) -> Result<(), GenericError> {
        registry.register(Arc::new(ConnectionPool::new("db-conn")))?;
        Ok(())
    }

    fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
        Ok(())
    }
}

fn service_status(registry: &Registry, component_id: &str) -> ServiceStatus {
    let component = registry.get(component_id).unwrap();
    let status = component.role().as_service().map(|s| s.status());
    status.unwrap()
}

#[test]
fn system_dispatch_scenario() {
    let registry = Registry::new();
    let system = System::new(registry.clone());
    let ctx = Context::background();

    let plugins = PluginManager::new(registry.clone());
    plugins.add(Arc::new(DatabasePlugin)).unwrap();
    plugins.load_all(&ctx).unwrap();

    assert_eq!(service_status(&registry, "db-conn"), ServiceStatus::Stopped);
    system.start_service(&ctx, "db-conn").unwrap();
    assert_eq!(service_status(&registry, "db-conn").as_str(), "Running");

    // Starting again is a no-op.
    system.start_service(&ctx, "db-conn").unwrap();
    assert_eq!(service_status(&registry, "db-conn"), ServiceStatus::Running);

    let err = system
        .execute_operation(&ctx, "missing-op", Default::default())
        .unwrap_err();
    assert_eq!(err.code(), "registry.item_not_found");

    let factory = ComponentFactory::new();
    registry
        .register(factory.create(&ComponentConfig::new("cfg", ComponentType::Basic)).unwrap())
        .unwrap();
    let err = system.start_service(&ctx, "cfg").unwrap_err();
    assert_eq!(err.code(), "component.invalid_component_type");

    system.stop_service(&ctx, "db-conn").unwrap();
    assert_eq!(service_status(&registry, "db-conn"), ServiceStatus::Stopped);

    plugins.unload_all(&ctx).unwrap();
}

#[test]
fn start_hook_runs_once_per_start() {
    let registry = Registry::new();
    let pool = Arc::new(ConnectionPool::new("db-conn"));
    registry.register(pool.clone()).unwrap();

    let system = System::new(registry);
    let ctx = Context::background();
    for _ in 0..3 {
        system.start_service(&ctx, "db-conn").unwrap();
    }
    assert_eq!(pool.opened.load(Relaxed), 1);

    system.stop_service(&ctx, "db-conn").unwrap();
    system.start_service(&ctx, "db-conn").unwrap();
    assert_eq!(pool.opened.load(Relaxed), 2);
}

#[test]
fn configured_dependencies_resolve_through_the_registry() {
    let registry = Registry::new();
    let factory = ComponentFactory::new();

    let configs = [
        ComponentConfig::new("app", ComponentType::Service)
            .with_dependency("cache")
            .with_dependency("store"),
        ComponentConfig::new("cache", ComponentType::Basic).with_dependency("disk"),
        ComponentConfig::new("store", ComponentType::Basic).with_dependency("disk"),
        ComponentConfig::new("disk", ComponentType::Basic),
    ];
    for config in &configs {
        registry.register(factory.create(config).unwrap()).unwrap();
    }

    let app = DependencyAware::with_dependencies(registry.get("app").unwrap(), ["cache", "store"]);
    let resolved = app.resolve_dependencies(&registry).unwrap();

    let mut ids = resolved.keys().map(|id| id.to_string()).collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, vec!["cache".to_string(), "store".to_string()]);
}

#[test]
fn mutual_dependencies_are_rejected() {
    let registry = Registry::new();
    let factory = ComponentFactory::new();

    registry
        .register(factory.create(&ComponentConfig::new("a", ComponentType::Basic).with_dependency("b")).unwrap())
        .unwrap();
    registry
        .register(factory.create(&ComponentConfig::new("b", ComponentType::Basic).with_dependency("a")).unwrap())
        .unwrap();

    let a = DependencyAware::with_dependencies(registry.get("a").unwrap(), ["b"]);
    let err = a.resolve_dependencies(&registry).unwrap_err();
    assert_eq!(err.code(), "dependency.circular_dependency");
}

#[test]
fn lifecycle_wrapper_survives_a_bad_observer() {
    let registry = Registry::new();
    let pool = Arc::new(LifecycleAware::new(Arc::new(ConnectionPool::new("db-conn"))));
    registry.register(pool.clone()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    pool.on_state_change(|_, _| panic!("bad observer"));
    pool.on_state_change(|_, to| match to {
        LifecycleState::Failed => Err(generic_error!("pager notified")),
        _ => Ok(()),
    });
    {
        let seen = Arc::clone(&seen);
        pool.on_state_change(move |from, to| {
            seen.lock().unwrap().push((from, to));
            Ok(())
        });
    }

    let transition = pool.set_state(LifecycleState::Active);
    assert_eq!(pool.state(), LifecycleState::Active);
    assert_eq!(transition.failures.len(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(LifecycleState::Created, LifecycleState::Active)]
    );

    // Active to Failed is allowed, and every observer still runs.
    let transition = pool.fail();
    assert_eq!(transition.notified, 3);
    assert_eq!(transition.failures.len(), 2);

    // The registered wrapper still dispatches as a service.
    let system = System::new(registry);
    system.start_service(&Context::background(), "db-conn").unwrap();
    assert!(system
        .registry()
        .get("db-conn")
        .unwrap()
        .role()
        .as_service()
        .map(|s| s.is_running())
        .unwrap_or(false));
}

#[test]
fn initialize_with_environment() {
    let registry = Registry::new();
    let system = System::new(registry.clone());
    let env = system.environment().with_property("region", json!("eu-west-1"));
    let ctx = Context::background().with_value("request_id", "boot");

    let pool = LifecycleAware::new(Arc::new(ConnectionPool::new("db-conn")));
    pool.initialize(&ctx, &env).unwrap();
    assert_eq!(pool.state(), LifecycleState::Initialized);

    let metadata = pool.metadata();
    assert_eq!(metadata.get("initialized"), Some(&json!(true)));
    assert!(metadata.contains_key("initialized_at"));
    assert_eq!(metadata.get("pool_size"), Some(&json!(4)));

    pool.dispose().unwrap();
    assert_eq!(pool.state(), LifecycleState::Disposed);
    assert!(pool.metadata().is_empty());
}
