// Intent Workflow Library - keyword research pipeline state machine
// This exposes the core components for hosts, testing and integration

pub mod workflow;
pub mod store;
pub mod queue;
pub mod bootstrap;
pub mod cli;
pub mod telemetry;
pub mod observability;
pub mod config;
pub mod database;

// Re-export key types for easy access
pub use workflow::{
    can_access_step, validate_canonical_graph, ApprovalService, GateDecision,
    IcpCompletionGate, OrganizationId, SubtopicApprovalGate, TransitionEngine,
    TransitionOutcome, WorkflowError, WorkflowEvent, WorkflowId, WorkflowRecord, WorkflowState,
};
pub use store::{FileStore, InMemoryStore};
pub use queue::{DeferredJobQueue, InngestQueue, RecordingJobQueue};
pub use bootstrap::{boot, boot_with, BootError, Runtime, Stores};
pub use telemetry::{init_telemetry, shutdown_telemetry, generate_correlation_id, create_transition_span};
pub use observability::{WorkflowMetrics, workflow_metrics, OperationTimer};
pub use config::IntentWorkflowConfig;
#[cfg(feature = "database")]
pub use database::SqliteStore;
