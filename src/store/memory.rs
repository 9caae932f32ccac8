use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Snapshot;
use crate::workflow::approvals::{ApprovalRecord, EntityType};
use crate::workflow::errors::StoreError;
use crate::workflow::reconciliation::PendingEmission;
use crate::workflow::traits::{ApprovalRepository, InconsistencyLog, WorkflowRepository};
use crate::workflow::types::{
    OrganizationId, StepStamp, WorkflowId, WorkflowRecord, WorkflowState,
};

/// Process-local store. The write lock makes compare-and-set atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Snapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the persisted state string, bypassing validation.
    /// Used to exercise the fail-fast path for corrupt rows.
    pub async fn put_raw_state(&self, id: &WorkflowId, state: &str) -> Result<(), StoreError> {
        let mut snapshot = self.inner.write().await;
        let row = snapshot
            .workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(format!("workflow {id}")))?;
        row.state = state.to_string();
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryStore {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        self.inner.write().await.create(record)
    }

    async fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        self.inner.read().await.get(id, organization_id)
    }

    async fn conditional_update(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
        expected: WorkflowState,
        next: WorkflowState,
        stamp: &StepStamp,
    ) -> Result<bool, StoreError> {
        self.inner
            .write()
            .await
            .conditional_update(id, organization_id, expected, next, stamp)
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryStore {
    async fn upsert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        self.inner.write().await.upsert_approval(record);
        Ok(())
    }

    async fn get(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .approval(organization_id, workflow_id, entity_type, entity_id))
    }

    async fn list_for_workflow(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .approvals_for(organization_id, workflow_id, entity_type))
    }
}

#[async_trait]
impl InconsistencyLog for InMemoryStore {
    async fn record(&self, pending: &PendingEmission) -> Result<(), StoreError> {
        self.inner.write().await.record_pending(pending);
        Ok(())
    }

    async fn pending(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<PendingEmission>, StoreError> {
        Ok(self.inner.read().await.unresolved(limit, max_attempts))
    }

    async fn exhausted(&self, max_attempts: u32) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.exhausted(max_attempts))
    }

    async fn mark_resolved(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.write().await.mark_resolved(id, at)
    }

    async fn record_failed_attempt(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.inner.write().await.record_failed_attempt(id, reason)
    }
}
