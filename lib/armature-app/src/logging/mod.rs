//! Logging.

use armature_error::{generic_error, GenericError};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Filtered, layer::SubscriberExt as _, reload, util::SubscriberInitExt as _, EnvFilter, Layer, Registry,
};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Keeps the logging backends alive.
///
/// Logs are written from a background thread. The guard must be held until the application is about to exit: dropping
/// it flushes whatever is still buffered.
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
    filter_handle: FilterHandle,
}

impl LoggingGuard {
    fn new(filter_handle: FilterHandle) -> Self {
        Self {
            worker_guards: Vec::new(),
            filter_handle,
        }
    }

    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }

    /// Replaces the active filtering directives.
    ///
    /// # Errors
    ///
    /// If the subscriber this guard belongs to has been dropped, an error is returned.
    pub fn set_log_level(&self, log_level: &LogLevel) -> Result<(), GenericError> {
        self.filter_handle
            .reload(log_level.as_env_filter())
            .map_err(|e| generic_error!("Failed to update log level: {}", e))
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
///
/// Meant for failures that happen before logging is initialized.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// The filtering directives come from [`LoggingConfiguration::log_level`], and can be changed afterwards through
/// [`LoggingGuard::set_log_level`]. Output is human-readable unless JSON output is enabled. When console output is
/// disabled, events are still filtered but written nowhere.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let (filter_layer, filter_handle) = reload::Layer::new(config.log_level.as_env_filter());

    let mut logging_guard = LoggingGuard::new(filter_handle);
    let mut configured_layers = Vec::new();

    if config.log_to_console {
        let (nb_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        logging_guard.add_worker_guard(guard);
        configured_layers.push(build_formatting_layer(config, nb_stdout));
    }

    // The filter is applied once, on top of the fanout, rather than once per output.
    let layers: Filtered<_, _, Registry> = configured_layers.with_filter(filter_layer);
    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| generic_error!("Failed to initialize logging: {}", e))?;

    info!(
        log_format_json = config.log_format_json,
        log_to_console = config.log_to_console,
        "Logging initialized."
    );

    Ok(logging_guard)
}
