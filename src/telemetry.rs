use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;
use crate::workflow::{GateKind, OrganizationId, WorkflowEvent, WorkflowId};

/// Initialize structured JSON logging. `RUST_LOG` overrides the configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!("Intent workflow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn create_transition_span(
    workflow_id: &WorkflowId,
    organization_id: &OrganizationId,
    event: WorkflowEvent,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "workflow_transition",
        workflow.id = %workflow_id,
        organization.id = %organization_id,
        workflow.event = %event,
        correlation.id = correlation_id,
    )
}

pub fn create_gate_span(
    gate: GateKind,
    workflow_id: &WorkflowId,
    organization_id: &OrganizationId,
) -> tracing::Span {
    tracing::info_span!(
        "gate",
        gate = %gate,
        workflow.id = %workflow_id,
        organization.id = %organization_id,
    )
}

/// Flush anything buffered before exit
pub fn shutdown_telemetry() {
    crate::observability::workflow_metrics().log_stats();
    tracing::debug!("Intent workflow telemetry shutdown complete");
}
