use std::fmt;
use thiserror::Error;

use super::types::{OrganizationId, WorkflowEvent, WorkflowId, WorkflowState};

/// A persisted or requested state outside the canonical enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workflow state '{value}'")]
pub struct UnknownStateError {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workflow event '{value}'")]
pub struct UnknownEventError {
    pub value: String,
}

/// The transition table has no edge for (state, event).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "cannot apply {event} while the workflow is in {state}; valid events: {}",
    list_events(.valid_events)
)]
pub struct TransitionError {
    pub state: WorkflowState,
    pub event: WorkflowEvent,
    pub valid_events: Vec<WorkflowEvent>,
}

fn list_events(events: &[WorkflowEvent]) -> String {
    if events.is_empty() {
        return "none (terminal state)".to_string();
    }
    events
        .iter()
        .map(|event| event.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    Missing(String),

    #[error(transparent)]
    UnknownState(#[from] UnknownStateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue rejected {event} with HTTP {status}")]
    Rejected { event: String, status: u16 },

    #[error("job queue transport error: {0}")]
    Transport(String),

    #[error("job queue not configured: {0}")]
    NotConfigured(String),

    /// No queue endpoint yet; the event waits in the inconsistency log
    #[error("automation event {0} deferred until a job queue is configured")]
    Deferred(String),
}

impl QueueError {
    /// Throttling, server errors and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Rejected { status, .. } => *status == 429 || *status >= 500,
            QueueError::Transport(_) => true,
            QueueError::NotConfigured(_) | QueueError::Deferred(_) => false,
        }
    }
}

/// Why a gate could not evaluate. What happens next depends on the gate.
#[derive(Debug, Error)]
pub enum GateEvaluationError {
    #[error("gate read failed: {0}")]
    Storage(#[from] StoreError),

    #[error("gate read exceeded {budget_ms}ms")]
    Timeout { budget_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    StepAccess,
    IcpCompletion,
    SubtopicApproval,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateKind::StepAccess => "step-access",
            GateKind::IcpCompletion => "ICP-completion",
            GateKind::SubtopicApproval => "subtopic-approval",
        })
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    UnknownState(#[from] UnknownStateError),

    #[error(transparent)]
    UnknownEvent(#[from] UnknownEventError),

    #[error("workflow {workflow_id} not found")]
    NotFound { workflow_id: WorkflowId },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("invalid approval request: {reason}")]
    InvalidDecision { reason: String },

    #[error("{gate} gate blocked: {reason}")]
    GateBlocked { gate: GateKind, reason: String },

    #[error(
        "workflow {workflow_id} left {boundary_state} but {event_name} was not emitted: {reason}"
    )]
    EmissionInconsistency {
        workflow_id: WorkflowId,
        organization_id: OrganizationId,
        boundary_state: WorkflowState,
        event_name: String,
        reason: String,
    },

    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Coarse classification a request handler maps onto a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidRequest,
    NotFound,
    Locked,
    Internal,
}

impl WorkflowError {
    /// Translate a store failure. Corrupt state values surface as
    /// `UnknownState` rather than a generic storage error.
    pub fn from_store(operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::UnknownState(err) => WorkflowError::UnknownState(err),
            source => WorkflowError::Storage { operation, source },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            WorkflowError::UnknownEvent(_)
            | WorkflowError::Transition(_)
            | WorkflowError::InvalidDecision { .. } => ErrorClass::InvalidRequest,
            WorkflowError::NotFound { .. } => ErrorClass::NotFound,
            WorkflowError::GateBlocked { .. } => ErrorClass::Locked,
            WorkflowError::UnknownState(_)
            | WorkflowError::EmissionInconsistency { .. }
            | WorkflowError::Storage { .. } => ErrorClass::Internal,
        }
    }

    /// Message safe to show an end user. Internal failures stay generic;
    /// the detail is in the operational log.
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::Internal => {
                "Something went wrong while updating the workflow. Please retry.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
