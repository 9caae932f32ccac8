// Static transition table for the intent workflow

use serde::Serialize;

use super::errors::TransitionError;
use super::types::{WorkflowEvent, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The single happy-path move out of a state.
    Forward,
    /// A legal detour that still lands on the canonical path.
    Alternate,
    /// FAIL / CANCEL exits.
    Administrative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionEdge {
    pub from: WorkflowState,
    pub event: WorkflowEvent,
    pub to: WorkflowState,
    pub kind: EdgeKind,
}

impl TransitionEdge {
    pub const fn new(
        from: WorkflowState,
        event: WorkflowEvent,
        to: WorkflowState,
        kind: EdgeKind,
    ) -> Self {
        Self { from, event, to, kind }
    }
}

const PIPELINE: [TransitionEdge; 11] = [
    TransitionEdge::new(
        WorkflowState::Step0Init,
        WorkflowEvent::IcpCompleted,
        WorkflowState::Step2Competitors,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step0Init,
        WorkflowEvent::IcpStarted,
        WorkflowState::Step1Icp,
        EdgeKind::Alternate,
    ),
    TransitionEdge::new(
        WorkflowState::Step1Icp,
        WorkflowEvent::IcpCompleted,
        WorkflowState::Step2Competitors,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step2Competitors,
        WorkflowEvent::CompetitorsCompleted,
        WorkflowState::Step3Seeds,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step3Seeds,
        WorkflowEvent::SeedsApproved,
        WorkflowState::Step4Longtails,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step4Longtails,
        WorkflowEvent::LongtailsCompleted,
        WorkflowState::Step5Filtering,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step5Filtering,
        WorkflowEvent::FilteringCompleted,
        WorkflowState::Step6Clustering,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step6Clustering,
        WorkflowEvent::ClusteringCompleted,
        WorkflowState::Step7Validation,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step7Validation,
        WorkflowEvent::ValidationCompleted,
        WorkflowState::Step8Subtopics,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step8Subtopics,
        WorkflowEvent::SubtopicsApproved,
        WorkflowState::Step9Articles,
        EdgeKind::Forward,
    ),
    TransitionEdge::new(
        WorkflowState::Step9Articles,
        WorkflowEvent::ArticlesCompleted,
        WorkflowState::Completed,
        EdgeKind::Forward,
    ),
];

/// Lookup table of every legal (state, event) → state move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    edges: Vec<TransitionEdge>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::canonical()
    }
}

impl TransitionTable {
    /// The shipped pipeline table, including FAIL/CANCEL from every
    /// non-terminal state.
    pub fn canonical() -> Self {
        let mut edges: Vec<TransitionEdge> = PIPELINE.to_vec();
        for from in WorkflowState::ALL.iter().copied().filter(|s| !s.is_terminal()) {
            edges.push(TransitionEdge::new(
                from,
                WorkflowEvent::Fail,
                WorkflowState::Failed,
                EdgeKind::Administrative,
            ));
            edges.push(TransitionEdge::new(
                from,
                WorkflowEvent::Cancel,
                WorkflowState::Cancelled,
                EdgeKind::Administrative,
            ));
        }
        Self { edges }
    }

    pub fn from_edges(edges: Vec<TransitionEdge>) -> Self {
        Self { edges }
    }

    pub fn edges(&self) -> &[TransitionEdge] {
        &self.edges
    }

    pub fn edge(&self, from: WorkflowState, event: WorkflowEvent) -> Option<&TransitionEdge> {
        self.edges
            .iter()
            .find(|edge| edge.from == from && edge.event == event)
    }

    pub fn next_state(&self, from: WorkflowState, event: WorkflowEvent) -> Option<WorkflowState> {
        self.edge(from, event).map(|edge| edge.to)
    }

    pub fn outgoing(&self, from: WorkflowState) -> impl Iterator<Item = &TransitionEdge> {
        self.edges.iter().filter(move |edge| edge.from == from)
    }

    /// Events accepted in `from`, happy path first.
    pub fn valid_events(&self, from: WorkflowState) -> Vec<WorkflowEvent> {
        let mut outgoing: Vec<&TransitionEdge> = self.outgoing(from).collect();
        outgoing.sort_by_key(|edge| match edge.kind {
            EdgeKind::Forward => 0,
            EdgeKind::Alternate => 1,
            EdgeKind::Administrative => 2,
        });
        outgoing.into_iter().map(|edge| edge.event).collect()
    }

    pub fn forward_edge(&self, from: WorkflowState) -> Option<&TransitionEdge> {
        self.outgoing(from).find(|edge| edge.kind == EdgeKind::Forward)
    }

    pub fn resolve(
        &self,
        from: WorkflowState,
        event: WorkflowEvent,
    ) -> Result<WorkflowState, TransitionError> {
        self.next_state(from, event).ok_or_else(|| TransitionError {
            state: from,
            event,
            valid_events: self.valid_events(from),
        })
    }

    pub fn without_edge(mut self, from: WorkflowState, event: WorkflowEvent) -> Self {
        self.edges
            .retain(|edge| !(edge.from == from && edge.event == event));
        self
    }

    pub fn with_edge(mut self, edge: TransitionEdge) -> Self {
        self.edges.push(edge);
        self
    }
}
