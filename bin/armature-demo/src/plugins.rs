//! Plugins compiled into the demo.

use std::sync::{
    atomic::{AtomicUsize, Ordering::Relaxed},
    Arc,
};

use armature_core::{
    components::{
        BaseComponent, BaseService, Component, ComponentConfig, ComponentType, Metadata, Operation, OperationInput,
        OperationOutput, Role, Service, ServiceStatus,
    },
    context::{Context, Environment},
    dependency::DependencyAware,
    lifecycle::LifecycleAware,
    plugin::Plugin,
    registry::Registry,
};
use armature_error::{generic_error, GenericError};
use serde_json::{json, Value};
use tracing::info;

const POOL_ID: &str = "db-conn";
const QUERY_ID: &str = "db-query";
const HTTP_SERVER_ID: &str = "http-server";

const OPEN_CONNECTIONS_KEY: &str = "open_connections";
const DEFAULT_POOL_SIZE: u64 = 4;
const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

/// Returns every plugin compiled into the demo.
pub fn available_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![Arc::new(DatabasePlugin), Arc::new(WebServerPlugin)]
}

// Forwards the base contract to an embedded base component or service.
macro_rules! delegate_component {
    ($ty:ty, $base:ident, $role:ident) => {
        impl Component for $ty {
            fn id(&self) -> &str {
                self.$base.id()
            }

            fn name(&self) -> &str {
                self.$base.name()
            }

            fn description(&self) -> &str {
                self.$base.description()
            }

            fn version(&self) -> &str {
                self.$base.version()
            }

            fn component_type(&self) -> ComponentType {
                self.$base.component_type()
            }

            fn metadata(&self) -> Metadata {
                self.$base.metadata()
            }

            fn set_metadata(&self, key: &str, value: Value) {
                self.$base.set_metadata(key, value)
            }

            fn initialize(&self, ctx: &Context, env: &Environment) -> Result<(), GenericError> {
                self.$base.initialize(ctx, env)
            }

            fn dispose(&self) -> Result<(), GenericError> {
                self.$base.dispose()
            }

            fn role(&self) -> Role<'_> {
                Role::$role(self)
            }
        }
    };
}

/// A pool of database connections.
///
/// Opening the pool "opens" `pool_size` connections, and publishes how many are open in the `open_connections`
/// metadata entry.
pub struct ConnectionPool {
    base: BaseService,
    pool_size: u64,
    open: AtomicUsize,
}

impl ConnectionPool {
    fn new(config: ComponentConfig) -> Self {
        let pool_size = config
            .properties
            .get("pool_size")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_POOL_SIZE);

        Self {
            base: BaseService::new(config),
            pool_size,
            open: AtomicUsize::new(0),
        }
    }

    fn set_open(&self, open: usize) {
        self.open.store(open, Relaxed);
        self.base.set_metadata(OPEN_CONNECTIONS_KEY, json!(open));
    }
}

delegate_component!(ConnectionPool, base, Service);

impl Service for ConnectionPool {
    fn start(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.start_with(|| {
            self.set_open(self.pool_size as usize);
            info!(component_id = self.id(), pool_size = self.pool_size, "Opened connection pool.");
            Ok(())
        })
    }

    fn stop(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.stop_with(|| {
            let closed = self.open.load(Relaxed);
            self.set_open(0);
            info!(component_id = self.id(), closed, "Closed connection pool.");
            Ok(())
        })
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn status(&self) -> ServiceStatus {
        self.base.status()
    }
}

/// Runs a statement against the connection pool.
///
/// The input payload is `{"sql": "<statement>"}`. There is no real database behind the pool, so the result always has
/// zero rows.
pub struct QueryOperation {
    base: BaseComponent,
    registry: Registry,
}

impl QueryOperation {
    fn new(config: ComponentConfig, registry: Registry) -> Self {
        Self {
            base: BaseComponent::new(config),
            registry,
        }
    }
}

delegate_component!(QueryOperation, base, Operation);

impl Operation for QueryOperation {
    fn execute(&self, ctx: &Context, input: OperationInput) -> Result<OperationOutput, GenericError> {
        if ctx.is_expired() {
            return Err(generic_error!("Deadline exceeded before the query was sent."));
        }

        let statement = input
            .data
            .get("sql")
            .and_then(Value::as_str)
            .ok_or_else(|| generic_error!("Query input must be an object with a string 'sql' field."))?;

        let open_connections = self
            .registry
            .get(POOL_ID)?
            .metadata()
            .get(OPEN_CONNECTIONS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if open_connections == 0 {
            return Err(generic_error!("No open connections in pool '{}'.", POOL_ID));
        }

        let mut output = OperationOutput::new(json!({ "statement": statement, "rows": [] }));
        output.metadata.insert("connections".to_string(), json!(open_connections));
        Ok(output)
    }
}

/// An HTTP server fronting the database.
///
/// Starting the server fails unless the connection pool is already running.
pub struct HttpServer {
    base: BaseService,
    listen_address: String,
    registry: Registry,
}

impl HttpServer {
    fn new(config: ComponentConfig, registry: Registry) -> Self {
        let listen_address = config
            .properties
            .get("listen_address")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LISTEN_ADDRESS)
            .to_string();

        Self {
            base: BaseService::new(config),
            listen_address,
            registry,
        }
    }

    fn pool_is_running(&self) -> bool {
        self.registry
            .get(POOL_ID)
            .map(|pool| pool.role().as_service().is_some_and(|s| s.is_running()))
            .unwrap_or(false)
    }
}

delegate_component!(HttpServer, base, Service);

impl Service for HttpServer {
    fn start(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.start_with(|| {
            if !self.pool_is_running() {
                return Err(generic_error!("Connection pool '{}' is not running.", POOL_ID));
            }

            info!(component_id = self.id(), listen_address = %self.listen_address, "HTTP server listening.");
            Ok(())
        })
    }

    fn stop(&self, _ctx: &Context) -> Result<(), GenericError> {
        self.base.stop_with(|| {
            info!(component_id = self.id(), "HTTP server stopped listening.");
            Ok(())
        })
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn status(&self) -> ServiceStatus {
        self.base.status()
    }
}

/// Builds the connection pool, wrapped so that its lifecycle transitions are logged.
fn tracked_pool() -> Arc<LifecycleAware> {
    let pool = ConnectionPool::new(
        ComponentConfig::new(POOL_ID, ComponentType::Service)
            .with_name("Connection Pool")
            .with_property("pool_size", DEFAULT_POOL_SIZE),
    );

    let pool = Arc::new(LifecycleAware::new(Arc::new(pool)));
    pool.on_state_change(|from, to| {
        info!(component_id = POOL_ID, %from, %to, "Connection pool lifecycle changed.");
        Ok(())
    });
    pool
}

/// Registers the connection pool and the query operation.
pub struct DatabasePlugin;

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
        registry.register(tracked_pool())?;

        let query = QueryOperation::new(
            ComponentConfig::new(QUERY_ID, ComponentType::Operation).with_name("Query"),
            registry.clone(),
        );
        registry.register(Arc::new(DependencyAware::with_dependencies(Arc::new(query), [POOL_ID])))?;

        Ok(())
    }

    fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
        info!(plugin_id = self.id(), "Database plugin unloaded.");
        Ok(())
    }
}

/// Registers the HTTP server.
pub struct WebServerPlugin;

impl Plugin for WebServerPlugin {
    fn id(&self) -> &str {
        "webserver"
    }

    fn name(&self) -> &str {
        "Web Server"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn load(&self, _ctx: &Context, registry: &Registry) -> Result<(), GenericError> {
        let server = HttpServer::new(
            ComponentConfig::new(HTTP_SERVER_ID, ComponentType::Service)
                .with_name("HTTP Server")
                .with_property("listen_address", DEFAULT_LISTEN_ADDRESS),
            registry.clone(),
        );
        registry.register(Arc::new(DependencyAware::with_dependencies(Arc::new(server), [POOL_ID])))?;

        Ok(())
    }

    fn unload(&self, _ctx: &Context) -> Result<(), GenericError> {
        info!(plugin_id = self.id(), "Web server plugin unloaded.");
        Ok(())
    }
}
