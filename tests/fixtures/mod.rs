//! Shared fixtures for the integration tests: seeded stores, a runtime
//! without emission retries, and repository wrappers that force races or
//! storage failures.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Barrier;

use intent_workflow::config::IntentWorkflowConfig;
use intent_workflow::workflow::{
    ActorId, ApprovalRecord, ApprovalRepository, EntityType, OrganizationId, StepStamp,
    StoreError, WorkflowId, WorkflowRecord, WorkflowRepository, WorkflowState,
};
use intent_workflow::{boot_with, InMemoryStore, RecordingJobQueue, Runtime, Stores};

/// Defaults with a single emission attempt so failure paths stay fast.
pub fn test_config() -> IntentWorkflowConfig {
    let mut config = IntentWorkflowConfig::default();
    config.emitter.max_attempts = 1;
    config.emitter.base_delay_ms = 1;
    config.emitter.max_delay_ms = 1;
    config
}

pub fn user() -> ActorId {
    ActorId::new("user-1")
}

/// Create a workflow for a fresh organization, already in `state`.
pub async fn seed(repository: &dyn WorkflowRepository, state: WorkflowState) -> WorkflowRecord {
    let mut record = WorkflowRecord::new(OrganizationId::new());
    record.state = state;
    repository
        .create(&record)
        .await
        .expect("seed workflow");
    record
}

pub async fn state_of(repository: &dyn WorkflowRepository, record: &WorkflowRecord) -> WorkflowState {
    repository
        .get(&record.id, &record.organization_id)
        .await
        .expect("read workflow")
        .expect("workflow exists")
        .state
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<RecordingJobQueue>,
    pub runtime: Runtime,
}

/// In-memory runtime wired the way `boot` wires a real one.
pub fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(RecordingJobQueue::new());
    let runtime = boot_with(Stores::shared(store.clone()), queue.clone(), &test_config())
        .expect("canonical graph boots");
    Harness {
        store,
        queue,
        runtime,
    }
}

/// Holds every reader at a barrier after its read, so `parties` concurrent
/// transitions all observe the same prior state before anyone writes.
pub struct BarrierRepository {
    inner: Arc<InMemoryStore>,
    barrier: Barrier,
}

impl BarrierRepository {
    pub fn new(inner: Arc<InMemoryStore>, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
        }
    }
}

#[async_trait]
impl WorkflowRepository for BarrierRepository {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        WorkflowRepository::create(self.inner.as_ref(), record).await
    }

    async fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        let record = WorkflowRepository::get(self.inner.as_ref(), id, organization_id).await?;
        self.barrier.wait().await;
        Ok(record)
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
            .conditional_update(id, organization_id, expected, next, stamp)
            .await
    }
}

/// Every read and write fails as if the database were down.
#[derive(Debug, Default)]
pub struct UnavailableStore;

fn unavailable() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl WorkflowRepository for UnavailableStore {
    async fn create(&self, _record: &WorkflowRecord) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn get(
        &self,
        _id: &WorkflowId,
        _organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        Err(unavailable())
    }

    async fn conditional_update(
        &self,
        _id: &WorkflowId,
        _organization_id: &OrganizationId,
        _expected: WorkflowState,
        _next: WorkflowState,
        _stamp: &StepStamp,
    ) -> Result<bool, StoreError> {
        Err(unavailable())
    }
}

#[async_trait]
impl ApprovalRepository for UnavailableStore {
    async fn upsert(&self, _record: &ApprovalRecord) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn get(
        &self,
        _organization_id: &OrganizationId,
        _workflow_id: &WorkflowId,
        _entity_type: EntityType,
        _entity_id: &str,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        Err(unavailable())
    }

    async fn list_for_workflow(
        &self,
        _organization_id: &OrganizationId,
        _workflow_id: &WorkflowId,
        _entity_type: EntityType,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        Err(unavailable())
    }
}
