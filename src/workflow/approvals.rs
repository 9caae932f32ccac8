// Human approval decisions and the actions that unlock automation boundaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::engine::{TransitionEngine, TransitionOutcome};
use super::errors::{GateKind, WorkflowError};
use super::gates::{GateDecision, GateStatus, SubtopicApprovalGate};
use super::traits::{ApprovalRepository, WorkflowRepository};
use super::types::{
    ActorId, OrganizationId, WorkflowEvent, WorkflowId, WorkflowRecord, WorkflowState,
};

/// Entity id used for decisions that cover the whole workflow rather than
/// one keyword or subtopic.
pub const WORKFLOW_SCOPE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    SeedKeywords,
    Subtopics,
    Clusters,
    Workflow,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::SeedKeywords,
        EntityType::Subtopics,
        EntityType::Clusters,
        EntityType::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::SeedKeywords => "seed_keywords",
            EntityType::Subtopics => "subtopics",
            EntityType::Clusters => "clusters",
            EntityType::Workflow => "workflow",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity| entity.as_str() == s.trim())
            .ok_or_else(|| WorkflowError::InvalidDecision {
                reason: format!(
                    "unknown entity type '{s}'; expected one of seed_keywords, subtopics, clusters, workflow"
                ),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(WorkflowError::InvalidDecision {
                reason: format!("unknown decision '{other}'; expected approved or rejected"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub decision: Decision,
    pub feedback: Option<String>,
    pub decided_by: ActorId,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// Store key: one decision per (organization, workflow, entity type, entity id)
    pub fn key(&self) -> (OrganizationId, WorkflowId, EntityType, &str) {
        (
            self.organization_id,
            self.workflow_id,
            self.entity_type,
            self.entity_id.as_str(),
        )
    }
}

/// A decision as it arrives from a caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApprovalRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub decision: String,
    pub feedback: Option<String>,
}

pub struct ApprovalService {
    workflows: Arc<dyn WorkflowRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    engine: Arc<TransitionEngine>,
    subtopic_gate: SubtopicApprovalGate,
}

impl ApprovalService {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        engine: Arc<TransitionEngine>,
    ) -> Self {
        let subtopic_gate = SubtopicApprovalGate::new(workflows.clone(), approvals.clone());
        Self {
            workflows,
            approvals,
            engine,
            subtopic_gate,
        }
    }

    pub async fn record_decision(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        actor_id: &ActorId,
        request: &ApprovalRequest,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let entity_type: EntityType = request.entity_type.parse()?;
        let decision: Decision = request.decision.parse()?;
        let entity_id = request.entity_id.trim();
        if entity_id.is_empty() {
            return Err(WorkflowError::InvalidDecision {
                reason: "entity id must not be empty".to_string(),
            });
        }

        self.require_workflow(workflow_id, organization_id).await?;

        let record = ApprovalRecord {
            organization_id: *organization_id,
            workflow_id: *workflow_id,
            entity_type,
            entity_id: entity_id.to_string(),
            decision,
            feedback: request
                .feedback
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            decided_by: actor_id.clone(),
            decided_at: Utc::now(),
        };

        self.approvals
            .upsert(&record)
            .await
            .map_err(|err| WorkflowError::from_store("record approval", err))?;

        info!(
            workflow_id = %workflow_id,
            entity_type = %entity_type,
            entity_id = %record.entity_id,
            decision = %decision,
            actor = %actor_id,
            "Approval decision recorded"
        );
        Ok(record)
    }

    /// Approve the seed keyword set and hand off to longtail expansion.
    pub async fn approve_seeds(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        actor_id: &ActorId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let record = self.require_workflow(workflow_id, organization_id).await?;
        if record.state != WorkflowState::Step3Seeds {
            // let the engine produce the canonical rejection with valid events
            return self
                .engine
                .transition(
                    workflow_id,
                    organization_id,
                    WorkflowEvent::SeedsApproved,
                    actor_id,
                )
                .await;
        }

        let approval = ApprovalRecord {
            organization_id: *organization_id,
            workflow_id: *workflow_id,
            entity_type: EntityType::SeedKeywords,
            entity_id: WORKFLOW_SCOPE.to_string(),
            decision: Decision::Approved,
            feedback: None,
            decided_by: actor_id.clone(),
            decided_at: Utc::now(),
        };
        self.approvals
            .upsert(&approval)
            .await
            .map_err(|err| WorkflowError::from_store("record seed approval", err))?;

        self.engine
            .transition(
                workflow_id,
                organization_id,
                WorkflowEvent::SeedsApproved,
                actor_id,
            )
            .await
    }

    /// Approve the reviewed subtopics and hand off to article generation.
    pub async fn approve_subtopics(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
        actor_id: &ActorId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let decision = self
            .subtopic_gate
            .validate_subtopic_approval_gate(workflow_id, organization_id)
            .await;

        if !decision.allowed {
            return Err(blocked(workflow_id, decision));
        }

        self.engine
            .transition(
                workflow_id,
                organization_id,
                WorkflowEvent::SubtopicsApproved,
                actor_id,
            )
            .await
    }

    async fn require_workflow(
        &self,
        workflow_id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<WorkflowRecord, WorkflowError> {
        self.workflows
            .get(workflow_id, organization_id)
            .await
            .map_err(|err| WorkflowError::from_store("load workflow", err))?
            .ok_or(WorkflowError::NotFound {
                workflow_id: *workflow_id,
            })
    }
}

fn blocked(workflow_id: &WorkflowId, decision: GateDecision) -> WorkflowError {
    if decision.status == GateStatus::NotFound {
        return WorkflowError::NotFound {
            workflow_id: *workflow_id,
        };
    }
    warn!(
        workflow_id = %workflow_id,
        status = ?decision.status,
        error = ?decision.error,
        "Subtopic approval refused by gate"
    );
    WorkflowError::GateBlocked {
        gate: GateKind::SubtopicApproval,
        reason: decision
            .message
            .unwrap_or_else(|| "subtopic approval is not available".to_string()),
    }
}
