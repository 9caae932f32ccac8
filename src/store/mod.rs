// Persistence adapters for workflow records, approvals and pending emissions
//
// Rows keep the state as the raw string that was written, so a value outside
// the canonical enumeration surfaces as UnknownState on read instead of being
// coerced at load time.

pub mod memory;
pub mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::workflow::approvals::{ApprovalRecord, EntityType};
use crate::workflow::errors::StoreError;
use crate::workflow::reconciliation::PendingEmission;
use crate::workflow::types::{
    OrganizationId, StepProgress, StepStamp, WorkflowId, WorkflowRecord, WorkflowState,
};

pub use file::FileStore;
pub use memory::InMemoryStore;

/// A workflow as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub state: String,
    #[serde(default)]
    pub steps: BTreeMap<u8, StepProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredWorkflow {
    pub fn into_record(self) -> Result<WorkflowRecord, StoreError> {
        Ok(WorkflowRecord {
            id: self.id,
            organization_id: self.organization_id,
            state: self.state.parse()?,
            steps: self.steps,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&WorkflowRecord> for StoredWorkflow {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            id: record.id,
            organization_id: record.organization_id,
            state: record.state.as_str().to_string(),
            steps: record.steps.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Everything a store holds. The memory store keeps one behind a lock; the
/// file store loads one per operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub workflows: BTreeMap<WorkflowId, StoredWorkflow>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
    #[serde(default)]
    pub pending_emissions: Vec<PendingEmission>,
}

impl Snapshot {
    pub fn create(&mut self, record: &WorkflowRecord) -> Result<(), StoreError> {
        if self.workflows.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("workflow {}", record.id)));
        }
        self.workflows.insert(record.id, StoredWorkflow::from(record));
        Ok(())
    }

    pub fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        self.workflows
            .get(id)
            .filter(|row| row.organization_id == *organization_id)
            .cloned()
            .map(StoredWorkflow::into_record)
            .transpose()
    }

    pub fn conditional_update(
        &mut self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
        expected: WorkflowState,
        next: WorkflowState,
        stamp: &StepStamp,
    ) -> Result<bool, StoreError> {
        let Some(row) = self
            .workflows
            .get_mut(id)
            .filter(|row| row.organization_id == *organization_id)
        else {
            return Ok(false);
        };

        let current: WorkflowState = row.state.parse()?;
        if current != expected {
            return Ok(false);
        }

        let mut record = row.clone().into_record()?;
        record.apply_stamp(next, stamp);
        *row = StoredWorkflow::from(&record);
        Ok(true)
    }

    pub fn upsert_approval(&mut self, record: &ApprovalRecord) {
        match self.approvals.iter_mut().find(|a| a.key() == record.key()) {
            Some(existing) => *existing = record.clone(),
            None => self.approvals.push(record.clone()),
        }
    }

    pub fn approval(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Option<ApprovalRecord> {
        self.approvals
            .iter()
            .find(|a| a.key() == (*organization_id, *workflow_id, entity_type, entity_id))
            .cloned()
    }

    pub fn approvals_for(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
    ) -> Vec<ApprovalRecord> {
        self.approvals
            .iter()
            .filter(|a| {
                a.organization_id == *organization_id
                    && a.workflow_id == *workflow_id
                    && a.entity_type == entity_type
            })
            .cloned()
            .collect()
    }

    pub fn record_pending(&mut self, pending: &PendingEmission) {
        self.pending_emissions.push(pending.clone());
    }

    pub fn unresolved(&self, limit: usize, max_attempts: u32) -> Vec<PendingEmission> {
        let mut pending: Vec<_> = self
            .pending_emissions
            .iter()
            .filter(|p| !p.is_resolved() && p.attempts < max_attempts)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.recorded_at);
        pending.truncate(limit);
        pending
    }

    pub fn exhausted(&self, max_attempts: u32) -> usize {
        self.pending_emissions
            .iter()
            .filter(|p| !p.is_resolved() && p.attempts >= max_attempts)
            .count()
    }

    pub fn mark_resolved(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let entry = self.pending_entry(id)?;
        entry.resolved_at = Some(at);
        Ok(())
    }

    pub fn record_failed_attempt(&mut self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let entry = self.pending_entry(id)?;
        entry.attempts += 1;
        entry.reason = reason.to_string();
        Ok(())
    }

    fn pending_entry(&mut self, id: Uuid) -> Result<&mut PendingEmission, StoreError> {
        self.pending_emissions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::Missing(format!("pending emission {id}")))
    }
}
