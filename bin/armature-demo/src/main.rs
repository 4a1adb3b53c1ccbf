//! Demo binary.
//!
//! Assembles a runtime from `armature.yaml` (or the file given with `--config`) plus `ARMATURE_`-prefixed environment
//! variables, using the plugins compiled into this binary.

#![deny(missing_docs)]

use std::path::{Path, PathBuf};

use armature_app::{
    logging::{fatal_and_exit, initialize_logging, LoggingConfiguration},
    runtime::{Runtime, RuntimeConfiguration},
};
use armature_config::{ConfigurationLoader, GenericConfiguration};
use armature_core::{
    components::{OperationInput, OperationOutput},
    context::Context,
    factory::ComponentFactory,
};
use armature_error::{ErrorContext as _, GenericError};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod plugins;
use self::plugins::available_plugins;

/// Runs a set of Armature components.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "armature.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand)]
enum Action {
    /// Starts every service and runs until interrupted.
    Run,

    /// Starts every service, executes a single operation, and prints its output.
    Execute {
        /// Identifier of the operation to execute.
        operation: String,

        /// Operation payload, as JSON.
        #[arg(short, long, default_value = "null")]
        input: String,
    },

    /// Lists the components in startup order.
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(&cli.config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {}", e)));
    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load logging configuration: {}", e)));
    let _guard = initialize_logging(&logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {}", e)));

    match run(cli.action.unwrap_or(Action::Run), &configuration).await {
        Ok(()) => info!("Armature demo stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn load_configuration(path: &Path) -> Result<GenericConfiguration, GenericError> {
    let loader = ConfigurationLoader::default()
        .try_from_yaml(path)
        .from_environment("ARMATURE")?;
    Ok(loader.into_generic())
}

fn build_runtime(configuration: &GenericConfiguration) -> Result<Runtime, GenericError> {
    let plugins = available_plugins();

    // With nothing configured, load every plugin so there is something to run.
    let mut runtime_config = RuntimeConfiguration::from_configuration(configuration)?;
    if runtime_config.components.is_empty() && runtime_config.plugins.is_empty() {
        runtime_config.plugins = plugins.iter().map(|plugin| plugin.id().to_string()).collect();
    }

    let runtime = Runtime::from_runtime_configuration(runtime_config, &ComponentFactory::new(), plugins)?;
    Ok(runtime)
}

async fn run(action: Action, configuration: &GenericConfiguration) -> Result<(), GenericError> {
    let runtime = build_runtime(configuration).error_context("Failed to build runtime.")?;
    let ctx = Context::background();

    match action {
        Action::List => {
            for component_id in runtime.startup_order() {
                let component = runtime.registry().get(component_id)?;
                println!(
                    "{} ({}, v{}): {}",
                    component.id(),
                    component.component_type(),
                    component.version(),
                    component.name()
                );
            }
            runtime.shutdown(&ctx)?;
        }
        Action::Execute { operation, input } => {
            let data: serde_json::Value =
                serde_json::from_str(&input).error_context("Operation input is not valid JSON.")?;

            let result = start_and_execute(&runtime, &ctx, &operation, OperationInput::new(data));
            let shutdown = runtime.shutdown(&ctx);

            let output = result?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            shutdown?;
        }
        Action::Run => {
            if let Err(e) = runtime.start(&ctx) {
                let _ = runtime.shutdown(&ctx);
                return Err(e.into());
            }

            info!(
                components = runtime.startup_order().len(),
                "Armature demo running. Press Ctrl-C to stop."
            );
            tokio::signal::ctrl_c()
                .await
                .error_context("Failed to listen for shutdown signal.")?;

            info!("Received shutdown signal. Stopping...");
            runtime.shutdown(&ctx)?;
        }
    }

    Ok(())
}

fn start_and_execute(
    runtime: &Runtime, ctx: &Context, operation: &str, input: OperationInput,
) -> Result<OperationOutput, GenericError> {
    runtime.start(ctx)?;
    let output = runtime.system().execute_operation(ctx, operation, input)?;
    Ok(output)
}
