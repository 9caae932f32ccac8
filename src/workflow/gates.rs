// Gate validators - read-only predicates in front of step navigation and
// approval actions.
//
// Fail policy is chosen per gate:
// - step access: fails closed, pure function of the taxonomy
// - ICP completion: fails open on infrastructure errors, bounded by a
//   fail-open quota; once the quota is spent it fails closed
// - subtopic approval: fails closed, it unlocks paid article generation

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn, Instrument};

use super::approvals::{Decision, EntityType};
use super::errors::{GateEvaluationError, GateKind, StoreError};
use super::taxonomy::{current_step, is_at_or_past_step};
use super::traits::{ApprovalRepository, WorkflowRepository};
use super::types::{OrganizationId, WorkflowId, WorkflowState};
use crate::config::GateConfig;
use crate::observability::workflow_metrics;
use crate::telemetry::create_gate_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Allowed,
    Blocked,
    NotFound,
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub gate: GateKind,
    pub allowed: bool,
    pub status: GateStatus,
    /// What the caller needs to do to get past the gate
    pub message: Option<String>,
    pub error: Option<String>,
}

impl GateDecision {
    fn allowed(gate: GateKind) -> Self {
        Self {
            gate,
            allowed: true,
            status: GateStatus::Allowed,
            message: None,
            error: None,
        }
    }

    fn blocked(gate: GateKind, message: impl Into<String>) -> Self {
        Self {
            gate,
            allowed: false,
            status: GateStatus::Blocked,
            message: Some(message.into()),
            error: None,
        }
    }

    fn not_found(gate: GateKind, workflow_id: &WorkflowId) -> Self {
        Self {
            gate,
            allowed: false,
            status: GateStatus::NotFound,
            message: Some(format!("workflow {workflow_id} not found")),
            error: None,
        }
    }

    fn fail_open(gate: GateKind, err: &GateEvaluationError) -> Self {
        Self {
            gate,
            allowed: true,
            status: GateStatus::FailOpen,
            message: None,
            error: Some(err.to_string()),
        }
    }

    fn fail_closed(gate: GateKind, err: &GateEvaluationError, message: &str) -> Self {
        Self {
            gate,
            allowed: false,
            status: GateStatus::FailClosed,
            message: Some(message.to_string()),
            error: Some(err.to_string()),
        }
    }
}

/// May the UI show `target_step` (1-9) for a workflow in `current_state`?
/// Any unknown state or out-of-range step denies.
pub fn can_access_step(current_state: &str, target_step: u8) -> bool {
    match current_state.parse::<WorkflowState>() {
        Ok(state) => can_access_step_for(state, target_step),
        Err(err) => {
            debug!(error = %err, target_step, "Denying step access for unknown state");
            false
        }
    }
}

pub fn can_access_step_for(state: WorkflowState, target_step: u8) -> bool {
    if !(1..=9).contains(&target_step) {
        return false;
    }
    match state {
        WorkflowState::Cancelled | WorkflowState::Failed => false,
        other => current_step(other).is_some_and(|step| target_step <= step),
    }
}

/// Bounds how many requests an infrastructure outage can wave through.
pub struct FailOpenBudget {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for FailOpenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailOpenBudget")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl FailOpenBudget {
    /// A budget of zero never fails open.
    pub fn per_minute(grants: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(grants).map(|n| RateLimiter::direct(Quota::per_minute(n))),
        }
    }

    pub fn try_grant(&self) -> bool {
        self.limiter
            .as_ref()
            .is_some_and(|limiter| limiter.check().is_ok())
    }
}

/// Has the workflow finished generating its ICP?
pub struct IcpCompletionGate {
    repository: Arc<dyn WorkflowRepository>,
    read_timeout: Duration,
    budget: FailOpenBudget,
}

impl IcpCompletionGate {
    pub fn new(repository: Arc<dyn WorkflowRepository>, config: &GateConfig) -> Self {
        Self {
            repository,
            read_timeout: Duration::from_millis(config.icp_read_timeout_ms),
            budget: FailOpenBudget::per_minute(config.icp_fail_open_per_minute),
        }
    }

    pub fn with_budget(mut self, budget: FailOpenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub async fn validate_icp_completion(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> GateDecision {
        let gate = GateKind::IcpCompletion;
        let span = create_gate_span(gate, workflow_id, organization_id);

        async {
            let read = tokio::time::timeout(
                self.read_timeout,
                self.repository.get(workflow_id, organization_id),
            )
            .await;

            let record = match read {
                Ok(Ok(record)) => record,
                // A corrupt row is not an outage and never opens the gate
                Ok(Err(err @ StoreError::UnknownState(_))) => {
                    let err = GateEvaluationError::Storage(err);
                    workflow_metrics().record_gate_fail_closed();
                    error!(error = %err, "ICP gate read an unknown workflow state, failing closed");
                    return GateDecision::fail_closed(
                        gate,
                        &err,
                        "workflow state is unreadable; contact support",
                    );
                }
                Ok(Err(err)) => return self.on_error(GateEvaluationError::Storage(err)),
                Err(_) => {
                    return self.on_error(GateEvaluationError::Timeout {
                        budget_ms: self.read_timeout.as_millis() as u64,
                    })
                }
            };

            let Some(record) = record else {
                return GateDecision::not_found(gate, workflow_id);
            };

            match record.state {
                WorkflowState::Cancelled | WorkflowState::Failed => GateDecision::blocked(
                    gate,
                    format!("workflow is {}; start a new workflow", record.state),
                ),
                state if is_at_or_past_step(state, WorkflowState::Step2Competitors) => {
                    GateDecision::allowed(gate)
                }
                state => GateDecision::blocked(
                    gate,
                    format!("workflow is in {state}; complete ICP generation first"),
                ),
            }
        }
        .instrument(span)
        .await
    }

    fn on_error(&self, err: GateEvaluationError) -> GateDecision {
        let gate = GateKind::IcpCompletion;
        if self.budget.try_grant() {
            workflow_metrics().record_gate_fail_open();
            warn!(error = %err, "ICP gate could not read workflow, failing open");
            GateDecision::fail_open(gate, &err)
        } else {
            workflow_metrics().record_gate_fail_closed();
            error!(
                error = %err,
                "ICP gate could not read workflow and the fail-open quota is spent, failing closed"
            );
            GateDecision::fail_closed(
                gate,
                &err,
                "workflow status is temporarily unavailable; retry shortly",
            )
        }
    }
}

/// May the workflow move past human subtopic approval into article generation?
pub struct SubtopicApprovalGate {
    workflows: Arc<dyn WorkflowRepository>,
    approvals: Arc<dyn ApprovalRepository>,
}

impl SubtopicApprovalGate {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        approvals: Arc<dyn ApprovalRepository>,
    ) -> Self {
        Self {
            workflows,
            approvals,
        }
    }

    pub async fn validate_subtopic_approval_gate(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> GateDecision {
        let gate = GateKind::SubtopicApproval;
        let span = create_gate_span(gate, workflow_id, organization_id);

        match self
            .evaluate(workflow_id, organization_id)
            .instrument(span)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                workflow_metrics().record_gate_fail_closed();
                error!(
                    workflow_id = %workflow_id,
                    error = %err,
                    "Subtopic approval gate could not evaluate, failing closed"
                );
                GateDecision::fail_closed(
                    gate,
                    &err,
                    "subtopic approvals could not be verified; retry before queuing articles",
                )
            }
        }
    }

    async fn evaluate(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<GateDecision, GateEvaluationError> {
        let gate = GateKind::SubtopicApproval;
        let Some(record) = self.workflows.get(workflow_id, organization_id).await? else {
            return Ok(GateDecision::not_found(gate, workflow_id));
        };

        if record.state != WorkflowState::Step8Subtopics {
            return Ok(GateDecision::blocked(
                gate,
                format!(
                    "workflow is in {}; subtopics can only be approved in {}",
                    record.state,
                    WorkflowState::Step8Subtopics
                ),
            ));
        }

        let decisions = self
            .approvals
            .list_for_workflow(organization_id, workflow_id, EntityType::Subtopics)
            .await?;
        let approved = decisions
            .iter()
            .filter(|d| d.decision == Decision::Approved)
            .count();

        if approved == 0 {
            let message = if decisions.is_empty() {
                "no subtopics have been reviewed yet; approve at least one".to_string()
            } else {
                format!(
                    "all {} reviewed subtopics were rejected; approve at least one",
                    decisions.len()
                )
            };
            return Ok(GateDecision::blocked(gate, message));
        }

        debug!(
            approved,
            rejected = decisions.len() - approved,
            "Subtopic approval gate satisfied"
        );
        Ok(GateDecision::allowed(gate))
    }
}
