// Reconciliation of boundary events whose state write landed but whose
// emission did not

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::boundary::{BoundaryEmitter, OutboundEvent};
use super::errors::{QueueError, StoreError};
use super::traits::InconsistencyLog;
use super::types::{OrganizationId, WorkflowId, WorkflowState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEmission {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub organization_id: OrganizationId,
    pub boundary_state: WorkflowState,
    pub event: OutboundEvent,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub recorded_on: String,
    pub attempts: u32,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingEmission {
    pub fn new(
        workflow_id: WorkflowId,
        organization_id: OrganizationId,
        boundary_state: WorkflowState,
        event: OutboundEvent,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            organization_id,
            boundary_state,
            event,
            reason: reason.into(),
            recorded_at: Utc::now(),
            recorded_on: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            attempts: 0,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub replayed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
    /// Still waiting for a job queue to be configured; no attempt is counted
    pub deferred: Vec<Uuid>,
    /// Entries that used up their replays and wait for manual review
    pub exhausted: usize,
}

/// Replays undelivered boundary events with their original idempotency key.
pub struct Reconciler {
    log: Arc<dyn InconsistencyLog>,
    emitter: BoundaryEmitter,
    batch_size: usize,
    max_attempts: u32,
}

impl Reconciler {
    pub fn new(log: Arc<dyn InconsistencyLog>, emitter: BoundaryEmitter) -> Self {
        Self {
            log,
            emitter,
            batch_size: 100,
            max_attempts: 10,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Entries that already failed this many replays are left for a human.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn reconcile(&self) -> Result<ReconciliationReport, StoreError> {
        self.reconcile_up_to(self.batch_size).await
    }

    /// Replay at most `limit` unresolved entries, oldest first. Exhausted
    /// entries are not fetched, so they never hold back newer ones.
    pub async fn reconcile_up_to(&self, limit: usize) -> Result<ReconciliationReport, StoreError> {
        let mut report = ReconciliationReport::default();
        let pending = self.log.pending(limit.max(1), self.max_attempts).await?;

        for entry in pending {
            match self.emitter.emit(&entry.event).await {
                Ok(receipt) => {
                    if let Err(err) = self.log.mark_resolved(entry.id, Utc::now()).await {
                        // Delivered but still listed; the next run resends under the same key
                        let reason = format!("delivered but not marked resolved: {err}");
                        error!(
                            pending_id = %entry.id,
                            workflow_id = %entry.workflow_id,
                            error = %err,
                            "Failed to mark replayed emission resolved"
                        );
                        report.failed.push((entry.id, reason));
                        continue;
                    }
                    info!(
                        pending_id = %entry.id,
                        workflow_id = %entry.workflow_id,
                        boundary_state = %entry.boundary_state,
                        event_name = %entry.event.name,
                        attempts = receipt.attempts,
                        "Replayed automation event"
                    );
                    report.replayed.push(entry.id);
                }
                Err(QueueError::Deferred(_)) => {
                    debug!(
                        pending_id = %entry.id,
                        event_name = %entry.event.name,
                        "No job queue configured, leaving pending emission in place"
                    );
                    report.deferred.push(entry.id);
                }
                Err(err) => {
                    let reason = err.to_string();
                    error!(
                        pending_id = %entry.id,
                        workflow_id = %entry.workflow_id,
                        boundary_state = %entry.boundary_state,
                        event_name = %entry.event.name,
                        error = %reason,
                        "Replay of automation event failed"
                    );
                    if let Err(log_err) = self.log.record_failed_attempt(entry.id, &reason).await {
                        warn!(
                            pending_id = %entry.id,
                            error = %log_err,
                            "Failed to record replay attempt"
                        );
                    }
                    report.failed.push((entry.id, reason));
                }
            }
        }

        report.exhausted = self.log.exhausted(self.max_attempts).await?;
        if report.exhausted > 0 {
            warn!(
                exhausted = report.exhausted,
                max_attempts = self.max_attempts,
                "Pending emissions exhausted their replays"
            );
        }

        Ok(report)
    }
}
