// Transition engine - the only writer of WorkflowRecord.state

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use super::boundary::{BoundaryEmitter, BoundaryTable, OutboundEvent};
use super::errors::{QueueError, WorkflowError};
use super::reconciliation::PendingEmission;
use super::traits::{InconsistencyLog, WorkflowRepository};
use super::transitions::TransitionTable;
use super::types::{
    ActorId, OrganizationId, StepStamp, WorkflowEvent, WorkflowId, WorkflowState,
};
use crate::observability::{workflow_metrics, OperationTimer};
use crate::telemetry::{create_transition_span, generate_correlation_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub workflow_id: WorkflowId,
    pub organization_id: OrganizationId,
    pub event: WorkflowEvent,
    pub actor_id: ActorId,
    /// Recorded against the step being left when the event is FAIL or CANCEL
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn new(
        workflow_id: WorkflowId,
        organization_id: OrganizationId,
        event: WorkflowEvent,
        actor_id: ActorId,
    ) -> Self {
        Self {
            workflow_id,
            organization_id,
            event,
            actor_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedTransition {
    pub workflow_id: WorkflowId,
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub event: WorkflowEvent,
    pub current_step: Option<u8>,
    pub emitted: Option<OutboundEvent>,
    /// Held in the inconsistency log because no job queue is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred: Option<OutboundEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied(AppliedTransition),
    /// Another request moved the workflow between our read and our write.
    /// Nothing was written; idempotent callers treat this as success.
    ConcurrentTransition {
        workflow_id: WorkflowId,
        expected: WorkflowState,
        event: WorkflowEvent,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn applied(&self) -> Option<&AppliedTransition> {
        match self {
            TransitionOutcome::Applied(applied) => Some(applied),
            TransitionOutcome::ConcurrentTransition { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TransitionOutcome::Applied(applied) => format!(
                "workflow {} moved from {} to {}",
                applied.workflow_id, applied.from, applied.to
            ),
            TransitionOutcome::ConcurrentTransition { .. } => {
                "transition not applied - concurrent transition occurred".to_string()
            }
        }
    }
}

pub struct TransitionEngine {
    repository: Arc<dyn WorkflowRepository>,
    table: TransitionTable,
    boundaries: BoundaryTable,
    emitter: BoundaryEmitter,
    inconsistencies: Option<Arc<dyn InconsistencyLog>>,
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("edges", &self.table.edges().len())
            .field("boundaries", &self.boundaries.iter().count())
            .field("emitter", &self.emitter)
            .field("inconsistency_log", &self.inconsistencies.is_some())
            .finish()
    }
}

impl TransitionEngine {
    pub fn new(repository: Arc<dyn WorkflowRepository>, emitter: BoundaryEmitter) -> Self {
        Self {
            repository,
            table: TransitionTable::canonical(),
            boundaries: BoundaryTable::canonical(),
            emitter,
            inconsistencies: None,
        }
    }

    pub fn with_tables(mut self, table: TransitionTable, boundaries: BoundaryTable) -> Self {
        self.table = table;
        self.boundaries = boundaries;
        self
    }

    pub fn with_inconsistency_log(mut self, log: Arc<dyn InconsistencyLog>) -> Self {
        self.inconsistencies = Some(log);
        self
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn boundaries(&self) -> &BoundaryTable {
        &self.boundaries
    }

    pub async fn transition(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        event: WorkflowEvent,
        actor_id: &ActorId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(&TransitionRequest::new(
            *workflow_id,
            *organization_id,
            event,
            actor_id.clone(),
        ))
        .await
    }

    /// Entry point for callers holding an unparsed event name.
    pub async fn transition_named(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        event: &str,
        actor_id: &ActorId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let event: WorkflowEvent = event.parse().map_err(WorkflowError::UnknownEvent)?;
        self.transition(workflow_id, organization_id, event, actor_id)
            .await
    }

    pub async fn apply(
        &self,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span(
            &request.workflow_id,
            &request.organization_id,
            request.event,
            &correlation_id,
        );
        let timer = OperationTimer::new("workflow_transition");
        let result = self.apply_inner(request).instrument(span).await;
        timer.finish();

        let metrics = workflow_metrics();
        match &result {
            Ok(TransitionOutcome::Applied(_)) => metrics.record_applied(),
            Ok(TransitionOutcome::ConcurrentTransition { .. }) => metrics.record_conflict(),
            Err(WorkflowError::Transition(_)) => metrics.record_rejected(),
            Err(_) => {}
        }
        result
    }

    async fn apply_inner(
        &self,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let record = self
            .repository
            .get(&request.workflow_id, &request.organization_id)
            .await
            .map_err(|err| WorkflowError::from_store("load workflow", err))?
            .ok_or(WorkflowError::NotFound {
                workflow_id: request.workflow_id,
            })?;

        let from = record.state;
        let to = self.table.resolve(from, request.event).map_err(|err| {
            warn!(
                state = %from,
                event = %request.event,
                valid_events = ?err.valid_events,
                "Rejected illegal transition"
            );
            WorkflowError::Transition(err)
        })?;

        let now = Utc::now();
        let stamp = StepStamp {
            // terminal states have no edges, so `from` always carries a step
            step: from.primary_step().unwrap_or_default(),
            at: now,
            actor: request.actor_id.clone(),
            // the step being left is unfinished on FAIL and CANCEL
            error_message: match request.event {
                WorkflowEvent::Fail => Some(
                    request
                        .reason
                        .clone()
                        .unwrap_or_else(|| "workflow failed".to_string()),
                ),
                WorkflowEvent::Cancel => Some(
                    request
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("cancelled by {}", request.actor_id)),
                ),
                _ => None,
            },
        };

        let landed = self
            .repository
            .conditional_update(
                &request.workflow_id,
                &request.organization_id,
                from,
                to,
                &stamp,
            )
            .await
            .map_err(|err| WorkflowError::from_store("conditional update", err))?;

        if !landed {
            info!(
                expected = %from,
                event = %request.event,
                "Transition not applied, concurrent transition occurred"
            );
            return Ok(TransitionOutcome::ConcurrentTransition {
                workflow_id: request.workflow_id,
                expected: from,
                event: request.event,
            });
        }

        info!(
            from = %from,
            to = %to,
            event = %request.event,
            actor = %request.actor_id,
            "Workflow transition applied"
        );

        let mut deferred = None;
        let emitted = match self.boundaries.check_boundary(from, request.event).copied() {
            Some(boundary) => {
                let event = OutboundEvent::for_boundary(
                    &boundary,
                    &request.workflow_id,
                    &request.organization_id,
                    &request.actor_id,
                    to,
                    now,
                );
                match self.emitter.emit(&event).await {
                    Ok(receipt) => {
                        workflow_metrics().record_emission();
                        info!(
                            event_name = %receipt.event.name,
                            attempts = receipt.attempts,
                            "Automation event emitted"
                        );
                        Some(receipt.event)
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        let is_deferred = matches!(err, QueueError::Deferred(_));
                        let recorded = self
                            .record_inconsistency(request, from, event.clone(), &reason)
                            .await;
                        if is_deferred && recorded {
                            warn!(
                                event_name = %event.name,
                                idempotency_key = %event.idempotency_key,
                                "Automation event deferred for reconciliation"
                            );
                            deferred = Some(event);
                            None
                        } else {
                            workflow_metrics().record_emission_failure();
                            error!(
                                workflow_id = %request.workflow_id,
                                organization_id = %request.organization_id,
                                boundary_state = %from,
                                event_name = %event.name,
                                idempotency_key = %event.idempotency_key,
                                error = %reason,
                                "State advanced but automation event was not emitted; manual replay required"
                            );
                            return Err(WorkflowError::EmissionInconsistency {
                                workflow_id: request.workflow_id,
                                organization_id: request.organization_id,
                                boundary_state: from,
                                event_name: event.name,
                                reason,
                            });
                        }
                    }
                }
            }
            None => None,
        };

        Ok(TransitionOutcome::Applied(AppliedTransition {
            workflow_id: request.workflow_id,
            from,
            to,
            event: request.event,
            current_step: super::taxonomy::current_step(to),
            emitted,
            deferred,
        }))
    }

    async fn record_inconsistency(
        &self,
        request: &TransitionRequest,
        boundary_state: WorkflowState,
        event: OutboundEvent,
        reason: &str,
    ) -> bool {
        let Some(log) = &self.inconsistencies else {
            return false;
        };
        let pending = PendingEmission::new(
            request.workflow_id,
            request.organization_id,
            boundary_state,
            event,
            reason,
        );
        if let Err(err) = log.record(&pending).await {
            error!(
                workflow_id = %request.workflow_id,
                boundary_state = %boundary_state,
                event_name = %pending.event.name,
                error = %err,
                "Failed to record pending emission for reconciliation"
            );
            return false;
        }
        true
    }
}
