use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use intent_workflow::cli::{commands, Cli};
use intent_workflow::config::IntentWorkflowConfig;
use intent_workflow::workflow::{ErrorClass, WorkflowError};
use intent_workflow::{init_telemetry, shutdown_telemetry};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn run(cli: Cli) -> Result<()> {
    // Telemetry depends on the env, so the outcome is logged once it is up
    let env_file = IntentWorkflowConfig::load_env_file();
    let config = IntentWorkflowConfig::load_from(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;
    match env_file {
        Ok(true) => tracing::info!("Loaded environment variables from .env file"),
        Ok(false) => {}
        Err(err) => tracing::warn!(error = %err, "Ignoring unreadable .env file"),
    }

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        commands::run(cli, &config).await
    });

    if config.observability.metrics_enabled {
        shutdown_telemetry();
    }
    result
}

/// Workflow errors get their user-facing message and a class-specific exit
/// code; the full chain is already in the log.
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<WorkflowError>() {
        Some(workflow_err) => {
            tracing::error!(error = %workflow_err, "Command failed");
            eprintln!("❌ {}", workflow_err.user_message());
            ExitCode::from(match workflow_err.class() {
                ErrorClass::InvalidRequest => 2,
                ErrorClass::NotFound => 3,
                ErrorClass::Locked => 4,
                ErrorClass::Internal => 1,
            })
        }
        None => {
            eprintln!("❌ {err:#}");
            ExitCode::FAILURE
        }
    }
}
