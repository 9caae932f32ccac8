// Intent Workflow Module - 10-step keyword research pipeline
//
// A single explicit transition table drives every state change. The engine
// is the only writer of workflow state; gates are read-only predicates and
// the two automation boundaries hand off to the job queue.

pub mod types;
pub mod errors;
pub mod transitions;
pub mod taxonomy;
pub mod boundary;
pub mod traits;
pub mod engine;
pub mod gates;
pub mod approvals;
pub mod reconciliation;

#[cfg(test)]
pub mod tests;

pub use approvals::{ApprovalRecord, ApprovalRequest, ApprovalService, Decision, EntityType};
pub use boundary::{
    AutomationBoundary, BoundaryEmitter, BoundaryTable, OutboundEvent, RetryPolicy,
    ARTICLE_QUEUING_EVENT, LONGTAIL_EXPANSION_EVENT,
};
pub use engine::{AppliedTransition, TransitionEngine, TransitionOutcome, TransitionRequest};
pub use errors::{
    ErrorClass, GateEvaluationError, GateKind, QueueError, StoreError, TransitionError,
    UnknownEventError, UnknownStateError, WorkflowError,
};
pub use gates::{
    can_access_step, can_access_step_for, FailOpenBudget, GateDecision, GateStatus,
    IcpCompletionGate, SubtopicApprovalGate,
};
pub use reconciliation::{PendingEmission, ReconciliationReport, Reconciler};
pub use taxonomy::{
    current_step, is_at_or_past_step, step_index_of, validate_canonical_graph, validate_graph,
    GraphReport, CANONICAL_ORDER,
};
pub use traits::{ApprovalRepository, InconsistencyLog, JobQueue, WorkflowRepository};
pub use transitions::{EdgeKind, TransitionEdge, TransitionTable};
pub use types::{
    ActorId, OrganizationId, StepProgress, StepStamp, WorkflowEvent, WorkflowId, WorkflowRecord,
    WorkflowState,
};
