// Traits for dependency injection - the collaborators the workflow core talks to

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::approvals::{ApprovalRecord, EntityType};
use super::boundary::OutboundEvent;
use super::errors::{QueueError, StoreError};
use super::reconciliation::PendingEmission;
use super::types::{OrganizationId, StepStamp, WorkflowId, WorkflowRecord, WorkflowState};

/// Workflow record store. Every lookup is scoped by organization.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new record (used by the workflow-creation collaborator)
    async fn create(&self, record: &WorkflowRecord) -> Result<(), StoreError>;

    /// Point read. A record belonging to another organization is `None`.
    async fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Write `next` only if the stored state still equals `expected`.
    /// Returns whether the write landed.
    async fn conditional_update(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
        expected: WorkflowState,
        next: WorkflowState,
        stamp: &StepStamp,
    ) -> Result<bool, StoreError>;
}

/// Human decisions, one per (workflow, entity type, entity id).
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Insert or overwrite the decision for the record's key
    async fn upsert(&self, record: &ApprovalRecord) -> Result<(), StoreError>;

    async fn get(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn list_for_workflow(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
    ) -> Result<Vec<ApprovalRecord>, StoreError>;
}

/// Outbound job queue.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, event: &OutboundEvent) -> Result<(), QueueError>;
}

/// Durable record of boundary events that were never delivered.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait InconsistencyLog: Send + Sync {
    async fn record(&self, pending: &PendingEmission) -> Result<(), StoreError>;

    /// Unresolved entries with fewer than `max_attempts` failed replays,
    /// oldest first
    async fn pending(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<PendingEmission>, StoreError>;

    /// Unresolved entries that have used up their replays
    async fn exhausted(&self, max_attempts: u32) -> Result<usize, StoreError>;

    async fn mark_resolved(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_failed_attempt(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;
}
