// Job queue adapters

pub mod inngest;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

use crate::workflow::boundary::OutboundEvent;
use crate::workflow::errors::QueueError;
use crate::workflow::traits::JobQueue;

pub use inngest::InngestQueue;

/// Used when no queue endpoint is configured. Every send is refused as
/// deferred, so the engine parks the event for `reconcile` instead of
/// counting it as delivered.
#[derive(Debug, Default)]
pub struct DeferredJobQueue;

#[async_trait]
impl JobQueue for DeferredJobQueue {
    async fn send(&self, event: &OutboundEvent) -> Result<(), QueueError> {
        warn!(
            event_name = %event.name,
            idempotency_key = %event.idempotency_key,
            "No job queue configured, deferring automation event"
        );
        Err(QueueError::Deferred(event.name.clone()))
    }
}

/// Keeps every delivered event in memory. Failures can be scripted ahead of
/// time to exercise retry and reconciliation paths.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    sent: Mutex<Vec<OutboundEvent>>,
    failures: Mutex<VecDeque<QueueError>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next send returns `error` instead of delivering
    pub fn fail_next(&self, error: QueueError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn fail_next_n(&self, count: usize) {
        for _ in 0..count {
            self.fail_next(QueueError::Transport("scripted failure".to_string()));
        }
    }

    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn sent_named(&self, name: &str) -> Vec<OutboundEvent> {
        self.sent()
            .into_iter()
            .filter(|event| event.name == name)
            .collect()
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn send(&self, event: &OutboundEvent) -> Result<(), QueueError> {
        let scripted = self
            .failures
            .lock()
            .map_err(|_| QueueError::Transport("recording queue poisoned".to_string()))?
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        self.sent
            .lock()
            .map_err(|_| QueueError::Transport("recording queue poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
