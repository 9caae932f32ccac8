// Automation boundaries - transitions that hand off to an asynchronous job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use super::errors::QueueError;
use super::traits::JobQueue;
use super::types::{ActorId, OrganizationId, WorkflowEvent, WorkflowId, WorkflowState};
use crate::config::EmitterConfig;

pub const LONGTAIL_EXPANSION_EVENT: &str = "intent/longtails.expand.requested";
pub const ARTICLE_QUEUING_EVENT: &str = "intent/articles.queue.requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutomationBoundary {
    pub state: WorkflowState,
    pub required_event: WorkflowEvent,
    pub emits: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryTable {
    boundaries: Vec<AutomationBoundary>,
}

impl Default for BoundaryTable {
    fn default() -> Self {
        Self::canonical()
    }
}

impl BoundaryTable {
    pub fn canonical() -> Self {
        Self {
            boundaries: vec![
                AutomationBoundary {
                    state: WorkflowState::Step3Seeds,
                    required_event: WorkflowEvent::SeedsApproved,
                    emits: LONGTAIL_EXPANSION_EVENT,
                },
                AutomationBoundary {
                    state: WorkflowState::Step8Subtopics,
                    required_event: WorkflowEvent::SubtopicsApproved,
                    emits: ARTICLE_QUEUING_EVENT,
                },
            ],
        }
    }

    pub fn from_boundaries(boundaries: Vec<AutomationBoundary>) -> Self {
        Self { boundaries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AutomationBoundary> {
        self.boundaries.iter()
    }

    /// Pure lookup: does leaving `state` via `event` require an emission?
    pub fn check_boundary(
        &self,
        state: WorkflowState,
        event: WorkflowEvent,
    ) -> Option<&AutomationBoundary> {
        self.boundaries
            .iter()
            .find(|b| b.state == state && b.required_event == event)
    }
}

/// Event handed to the job queue. The idempotency key is stable per
/// (workflow, boundary), so a replay is deduplicated downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub idempotency_key: String,
}

impl OutboundEvent {
    pub fn for_boundary(
        boundary: &AutomationBoundary,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        actor_id: &ActorId,
        to: WorkflowState,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: boundary.emits.to_string(),
            data: serde_json::json!({
                "workflowId": workflow_id,
                "organizationId": organization_id,
                "actorId": actor_id,
                "fromState": boundary.state,
                "toState": to,
                "transitionedAt": at,
            }),
            idempotency_key: idempotency_key(workflow_id, boundary.state, boundary.emits),
        }
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.data.get("workflowId").and_then(|v| v.as_str())
    }
}

pub fn idempotency_key(workflow_id: &WorkflowId, state: WorkflowState, event_name: &str) -> String {
    format!("{workflow_id}:{state}:{event_name}")
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl From<&EmitterConfig> for RetryPolicy {
    fn from(config: &EmitterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delays(&self) -> Vec<Duration> {
        // base * 2^n, capped; attempts beyond the first are retries
        let retries = self.max_attempts.saturating_sub(1) as usize;
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(retries)
            .map(|delay| if self.jitter { jitter(delay) } else { delay })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmissionReceipt {
    pub event: OutboundEvent,
    pub attempts: u32,
}

/// Delivers boundary events at-least-once. Downstream consumers dedupe on
/// the idempotency key, so a duplicate send is preferred over a skipped one.
#[derive(Clone)]
pub struct BoundaryEmitter {
    queue: Arc<dyn JobQueue>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for BoundaryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryEmitter")
            .field("retry", &self.retry)
            .finish()
    }
}

impl BoundaryEmitter {
    pub fn new(queue: Arc<dyn JobQueue>, retry: RetryPolicy) -> Self {
        Self { queue, retry }
    }

    pub async fn emit(&self, event: &OutboundEvent) -> Result<EmissionReceipt, QueueError> {
        let mut attempts = 0u32;
        let result = RetryIf::spawn(
            self.retry.delays(),
            || {
                attempts += 1;
                debug!(event = %event.name, attempt = attempts, "Sending automation event");
                self.queue.send(event)
            },
            |err: &QueueError| {
                let retry = err.is_transient();
                if retry {
                    warn!(event = %event.name, error = %err, "Automation event send failed, retrying");
                }
                retry
            },
        )
        .await;

        result.map(|()| EmissionReceipt {
            event: event.clone(),
            attempts,
        })
    }
}
