// JSON file store. Every operation takes an exclusive OS lock on a sidecar
// lock file, so independent handles (and processes) on the same path see a
// consistent compare-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::Snapshot;
use crate::workflow::approvals::{ApprovalRecord, EntityType};
use crate::workflow::errors::StoreError;
use crate::workflow::reconciliation::PendingEmission;
use crate::workflow::traits::{ApprovalRepository, InconsistencyLog, WorkflowRepository};
use crate::workflow::types::{
    OrganizationId, StepStamp, WorkflowId, WorkflowRecord, WorkflowState,
};

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Ok(Self {
            path,
            lock_path: PathBuf::from(lock_path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Snapshot) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let lock_file = store.lock_file()?;
            let lock = RwLock::new(lock_file);
            let _guard = lock.read()?;
            op(&store.load()?)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("file store task failed: {err}")))?
    }

    async fn mutate<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Snapshot) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let lock_file = store.lock_file()?;
            let mut lock = RwLock::new(lock_file);
            let _guard = lock.write()?;
            let mut snapshot = store.load()?;
            let result = op(&mut snapshot)?;
            store.save(&snapshot)?;
            Ok(result)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("file store task failed: {err}")))?
    }

    fn lock_file(&self) -> Result<File, StoreError> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn load(&self) -> Result<Snapshot, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Snapshot::default()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write to a sibling temp file and rename over the data file
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&serde_json::to_vec_pretty(snapshot)?)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "Workflow store saved");
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for FileStore {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.mutate(move |snapshot| snapshot.create(&record)).await
    }

    async fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        let (id, organization_id) = (*id, *organization_id);
        self.read(move |snapshot| snapshot.get(&id, &organization_id))
            .await
    }

    async fn conditional_update(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
        expected: WorkflowState,
        next: WorkflowState,
        stamp: &StepStamp,
    ) -> Result<bool, StoreError> {
        let (id, organization_id, stamp) = (*id, *organization_id, stamp.clone());
        self.mutate(move |snapshot| {
            snapshot.conditional_update(&id, &organization_id, expected, next, &stamp)
        })
        .await
    }
}

#[async_trait]
impl ApprovalRepository for FileStore {
    async fn upsert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.mutate(move |snapshot| {
            snapshot.upsert_approval(&record);
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let (organization_id, workflow_id) = (*organization_id, *workflow_id);
        let entity_id = entity_id.to_string();
        self.read(move |snapshot| {
            Ok(snapshot.approval(&organization_id, &workflow_id, entity_type, &entity_id))
        })
        .await
    }

    async fn list_for_workflow(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let (organization_id, workflow_id) = (*organization_id, *workflow_id);
        self.read(move |snapshot| {
            Ok(snapshot.approvals_for(&organization_id, &workflow_id, entity_type))
        })
        .await
    }
}

#[async_trait]
impl InconsistencyLog for FileStore {
    async fn record(&self, pending: &PendingEmission) -> Result<(), StoreError> {
        let pending = pending.clone();
        self.mutate(move |snapshot| {
            snapshot.record_pending(&pending);
            Ok(())
        })
        .await
    }

    async fn pending(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<PendingEmission>, StoreError> {
        self.read(move |snapshot| Ok(snapshot.unresolved(limit, max_attempts)))
            .await
    }

    async fn exhausted(&self, max_attempts: u32) -> Result<usize, StoreError> {
        self.read(move |snapshot| Ok(snapshot.exhausted(max_attempts)))
            .await
    }

    async fn mark_resolved(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(move |snapshot| snapshot.mark_resolved(id, at))
            .await
    }

    async fn record_failed_attempt(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let reason = reason.to_string();
        self.mutate(move |snapshot| snapshot.record_failed_attempt(id, &reason))
            .await
    }
}
