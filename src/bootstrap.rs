// Startup sequence: validate the transition graph, then wire stores, the job
// queue, the engine, gates and services. A host must not serve requests
// unless `boot` succeeded.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{IntentWorkflowConfig, JobQueueConfig, StorageBackend};
use crate::queue::{DeferredJobQueue, InngestQueue};
use crate::store::{FileStore, InMemoryStore};
use crate::workflow::{
    validate_canonical_graph, ApprovalRepository, ApprovalService, BoundaryEmitter, GraphReport,
    IcpCompletionGate, InconsistencyLog, JobQueue, QueueError, Reconciler, RetryPolicy,
    StoreError, SubtopicApprovalGate, TransitionEngine, WorkflowRepository,
};

#[derive(Debug, Error)]
pub enum BootError {
    #[error("transition graph failed validation: {}", .0.errors.join("; "))]
    InvalidGraph(GraphReport),

    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),

    #[error("job queue misconfigured: {0}")]
    Queue(#[from] QueueError),

    #[error("storage backend '{0}' requires the `database` feature")]
    FeatureDisabled(&'static str),

    #[error("storage backend 'sqlite' requires a [database] section")]
    MissingDatabaseConfig,
}

/// Check the shipped transition table, taxonomy and boundaries agree.
pub fn validate_startup() -> Result<GraphReport, BootError> {
    let report = validate_canonical_graph();
    if !report.valid {
        for problem in &report.errors {
            error!(problem = %problem, "Transition graph invalid");
        }
        return Err(BootError::InvalidGraph(report));
    }
    info!("Transition graph validated");
    Ok(report)
}

/// The three store roles. One backend usually fills all of them.
#[derive(Clone)]
pub struct Stores {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub inconsistencies: Arc<dyn InconsistencyLog>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: WorkflowRepository + ApprovalRepository + InconsistencyLog + 'static,
    {
        Self {
            workflows: store.clone(),
            approvals: store.clone(),
            inconsistencies: store,
        }
    }
}

/// Everything a host needs to serve workflow operations.
pub struct Runtime {
    pub stores: Stores,
    pub engine: Arc<TransitionEngine>,
    pub icp_gate: IcpCompletionGate,
    pub subtopic_gate: SubtopicApprovalGate,
    pub approvals: ApprovalService,
    pub reconciler: Reconciler,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Validate the graph and build the runtime from configuration.
pub async fn boot(config: &IntentWorkflowConfig) -> Result<Runtime, BootError> {
    validate_startup()?;
    let stores = open_stores(config).await?;
    let queue = build_queue(&config.job_queue)?;
    Ok(assemble(stores, queue, config))
}

/// Validate the graph and build the runtime around caller-provided
/// collaborators (embedding hosts and tests).
pub fn boot_with(
    stores: Stores,
    queue: Arc<dyn JobQueue>,
    config: &IntentWorkflowConfig,
) -> Result<Runtime, BootError> {
    validate_startup()?;
    Ok(assemble(stores, queue, config))
}

fn assemble(stores: Stores, queue: Arc<dyn JobQueue>, config: &IntentWorkflowConfig) -> Runtime {
    let emitter = BoundaryEmitter::new(queue, RetryPolicy::from(&config.emitter));

    let engine = Arc::new(
        TransitionEngine::new(stores.workflows.clone(), emitter.clone())
            .with_inconsistency_log(stores.inconsistencies.clone()),
    );
    let icp_gate = IcpCompletionGate::new(stores.workflows.clone(), &config.gates);
    let subtopic_gate =
        SubtopicApprovalGate::new(stores.workflows.clone(), stores.approvals.clone());
    let approvals = ApprovalService::new(
        stores.workflows.clone(),
        stores.approvals.clone(),
        engine.clone(),
    );
    let reconciler = Reconciler::new(stores.inconsistencies.clone(), emitter)
        .with_max_attempts(config.emitter.max_replays);

    Runtime {
        stores,
        engine,
        icp_gate,
        subtopic_gate,
        approvals,
        reconciler,
    }
}

pub async fn open_stores(config: &IntentWorkflowConfig) -> Result<Stores, BootError> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Stores::shared(Arc::new(InMemoryStore::new()))),
        StorageBackend::File => {
            let store = FileStore::open(&config.storage.path)?;
            info!(path = %store.path().display(), "Using file store");
            Ok(Stores::shared(Arc::new(store)))
        }
        StorageBackend::Sqlite => open_sqlite(config).await,
    }
}

#[cfg(feature = "database")]
async fn open_sqlite(config: &IntentWorkflowConfig) -> Result<Stores, BootError> {
    let db_config = config
        .database
        .as_ref()
        .ok_or(BootError::MissingDatabaseConfig)?;
    info!("Initializing database at {}", db_config.url);
    let store = crate::database::SqliteStore::connect(db_config).await?;
    Ok(Stores::shared(Arc::new(store)))
}

#[cfg(not(feature = "database"))]
async fn open_sqlite(_config: &IntentWorkflowConfig) -> Result<Stores, BootError> {
    Err(BootError::FeatureDisabled("sqlite"))
}

/// An unset base URL defers events to the inconsistency log.
pub fn build_queue(config: &JobQueueConfig) -> Result<Arc<dyn JobQueue>, BootError> {
    match config.base_url {
        Some(_) => {
            let queue = InngestQueue::from_config(config)?;
            info!(
                timeout_ms = config.request_timeout_ms,
                "Using HTTP job queue"
            );
            Ok(Arc::new(queue))
        }
        None => {
            warn!(
                "No job queue configured (job_queue.base_url); automation events are \
                 deferred until `reconcile` runs against a configured queue"
            );
            Ok(Arc::new(DeferredJobQueue))
        }
    }
}
