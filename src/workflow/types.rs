// Core workflow types - states, events, identities and the persisted record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::{UnknownEventError, UnknownStateError};

/// Every state a keyword-research workflow can be in, in canonical order.
///
/// Discriminants are the canonical ordering; `ordinal()` relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkflowState {
    #[serde(rename = "step_0_init")]
    Step0Init,
    #[serde(rename = "step_1_icp")]
    Step1Icp,
    #[serde(rename = "step_2_competitors")]
    Step2Competitors,
    #[serde(rename = "step_3_seeds")]
    Step3Seeds,
    #[serde(rename = "step_4_longtails")]
    Step4Longtails,
    #[serde(rename = "step_5_filtering")]
    Step5Filtering,
    #[serde(rename = "step_6_clustering")]
    Step6Clustering,
    #[serde(rename = "step_7_validation")]
    Step7Validation,
    #[serde(rename = "step_8_subtopics")]
    Step8Subtopics,
    #[serde(rename = "step_9_articles")]
    Step9Articles,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "failed")]
    Failed,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 13] = [
        WorkflowState::Step0Init,
        WorkflowState::Step1Icp,
        WorkflowState::Step2Competitors,
        WorkflowState::Step3Seeds,
        WorkflowState::Step4Longtails,
        WorkflowState::Step5Filtering,
        WorkflowState::Step6Clustering,
        WorkflowState::Step7Validation,
        WorkflowState::Step8Subtopics,
        WorkflowState::Step9Articles,
        WorkflowState::Completed,
        WorkflowState::Cancelled,
        WorkflowState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Step0Init => "step_0_init",
            WorkflowState::Step1Icp => "step_1_icp",
            WorkflowState::Step2Competitors => "step_2_competitors",
            WorkflowState::Step3Seeds => "step_3_seeds",
            WorkflowState::Step4Longtails => "step_4_longtails",
            WorkflowState::Step5Filtering => "step_5_filtering",
            WorkflowState::Step6Clustering => "step_6_clustering",
            WorkflowState::Step7Validation => "step_7_validation",
            WorkflowState::Step8Subtopics => "step_8_subtopics",
            WorkflowState::Step9Articles => "step_9_articles",
            WorkflowState::Completed => "completed",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Failed => "failed",
        }
    }

    /// Position in the canonical enumeration.
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Cancelled | WorkflowState::Failed
        )
    }

    /// Step number for the primary `step_N_*` states. Terminal states have none.
    pub fn primary_step(&self) -> Option<u8> {
        match self {
            WorkflowState::Step0Init => Some(0),
            WorkflowState::Step1Icp => Some(1),
            WorkflowState::Step2Competitors => Some(2),
            WorkflowState::Step3Seeds => Some(3),
            WorkflowState::Step4Longtails => Some(4),
            WorkflowState::Step5Filtering => Some(5),
            WorkflowState::Step6Clustering => Some(6),
            WorkflowState::Step7Validation => Some(7),
            WorkflowState::Step8Subtopics => Some(8),
            WorkflowState::Step9Articles => Some(9),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Step0Init => "Initialization",
            WorkflowState::Step1Icp => "ICP generation",
            WorkflowState::Step2Competitors => "Competitor analysis",
            WorkflowState::Step3Seeds => "Seed keyword approval",
            WorkflowState::Step4Longtails => "Longtail expansion",
            WorkflowState::Step5Filtering => "Keyword filtering",
            WorkflowState::Step6Clustering => "Topic clustering",
            WorkflowState::Step7Validation => "Cluster validation",
            WorkflowState::Step8Subtopics => "Subtopic approval",
            WorkflowState::Step9Articles => "Article queuing",
            WorkflowState::Completed => "Completed",
            WorkflowState::Cancelled => "Cancelled",
            WorkflowState::Failed => "Failed",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = UnknownStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| UnknownStateError {
                value: value.to_string(),
            })
    }
}

/// Named triggers accepted by the transition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
    IcpStarted,
    IcpCompleted,
    CompetitorsCompleted,
    SeedsApproved,
    LongtailsCompleted,
    FilteringCompleted,
    ClusteringCompleted,
    ValidationCompleted,
    SubtopicsApproved,
    ArticlesCompleted,
    Fail,
    Cancel,
}

impl WorkflowEvent {
    pub const ALL: [WorkflowEvent; 12] = [
        WorkflowEvent::IcpStarted,
        WorkflowEvent::IcpCompleted,
        WorkflowEvent::CompetitorsCompleted,
        WorkflowEvent::SeedsApproved,
        WorkflowEvent::LongtailsCompleted,
        WorkflowEvent::FilteringCompleted,
        WorkflowEvent::ClusteringCompleted,
        WorkflowEvent::ValidationCompleted,
        WorkflowEvent::SubtopicsApproved,
        WorkflowEvent::ArticlesCompleted,
        WorkflowEvent::Fail,
        WorkflowEvent::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEvent::IcpStarted => "ICP_STARTED",
            WorkflowEvent::IcpCompleted => "ICP_COMPLETED",
            WorkflowEvent::CompetitorsCompleted => "COMPETITORS_COMPLETED",
            WorkflowEvent::SeedsApproved => "SEEDS_APPROVED",
            WorkflowEvent::LongtailsCompleted => "LONGTAILS_COMPLETED",
            WorkflowEvent::FilteringCompleted => "FILTERING_COMPLETED",
            WorkflowEvent::ClusteringCompleted => "CLUSTERING_COMPLETED",
            WorkflowEvent::ValidationCompleted => "VALIDATION_COMPLETED",
            WorkflowEvent::SubtopicsApproved => "SUBTOPICS_APPROVED",
            WorkflowEvent::ArticlesCompleted => "ARTICLES_COMPLETED",
            WorkflowEvent::Fail => "FAIL",
            WorkflowEvent::Cancel => "CANCEL",
        }
    }

    /// FAIL and CANCEL are administrative exits, not pipeline progress.
    pub fn is_administrative(&self) -> bool {
        matches!(self, WorkflowEvent::Fail | WorkflowEvent::Cancel)
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowEvent {
    type Err = UnknownEventError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        WorkflowEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| UnknownEventError {
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Tenant scope. Every store read and write filters on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub Uuid);

impl OrganizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrganizationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Whoever requested a transition: a user id, or a system actor such as a
/// queue consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ActorId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Diagnostics for a single step. Never consulted for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<ActorId>,
    pub error_message: Option<String>,
}

/// What a successful conditional write records against the step being left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStamp {
    pub step: u8,
    pub at: DateTime<Utc>,
    pub actor: ActorId,
    pub error_message: Option<String>,
}

impl StepStamp {
    /// FAIL and CANCEL leave the step unfinished; anything else completes it.
    pub fn apply_to(&self, progress: &mut StepProgress) {
        match &self.error_message {
            Some(message) => progress.error_message = Some(message.clone()),
            None => {
                progress.completed_at = Some(self.at);
                progress.completed_by = Some(self.actor.clone());
                progress.error_message = None;
            }
        }
    }
}

/// One run of the keyword-research pipeline for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub state: WorkflowState,
    #[serde(default)]
    pub steps: BTreeMap<u8, StepProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(organization_id: OrganizationId) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            organization_id,
            state: WorkflowState::Step0Init,
            steps: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived from `state`; there is no stored step column to drift.
    pub fn current_step(&self) -> Option<u8> {
        super::taxonomy::current_step(self.state)
    }

    pub fn step_progress(&self, step: u8) -> Option<&StepProgress> {
        self.steps.get(&step)
    }

    pub fn apply_stamp(&mut self, next: WorkflowState, stamp: &StepStamp) {
        stamp.apply_to(self.steps.entry(stamp.step).or_default());
        self.state = next;
        self.updated_at = stamp.at;
    }
}
