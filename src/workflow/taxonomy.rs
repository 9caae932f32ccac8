// State taxonomy - canonical ordering and the startup graph self-check

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use super::boundary::BoundaryTable;
use super::errors::UnknownStateError;
use super::transitions::{EdgeKind, TransitionTable};
use super::types::{WorkflowEvent, WorkflowState};

/// Canonical order: the nine steps behind `step_0_init`, then the terminal tail.
pub const CANONICAL_ORDER: [WorkflowState; 13] = WorkflowState::ALL;

pub fn step_index_of(state: WorkflowState) -> usize {
    state.ordinal()
}

/// Like [`step_index_of`] for a raw persisted or requested value.
pub fn step_index_of_raw(value: &str) -> Result<usize, UnknownStateError> {
    value.parse::<WorkflowState>().map(step_index_of)
}

pub fn is_at_or_past_step(current: WorkflowState, target: WorkflowState) -> bool {
    step_index_of(current) >= step_index_of(target)
}

pub fn is_at_or_past_step_raw(current: &str, target: &str) -> Result<bool, UnknownStateError> {
    Ok(step_index_of_raw(current)? >= step_index_of_raw(target)?)
}

/// The 1-9 step view of a state. `completed` sits on the last step;
/// `cancelled` and `failed` have no position.
pub fn current_step(state: WorkflowState) -> Option<u8> {
    match state {
        WorkflowState::Completed => Some(9),
        other => other.primary_step(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl GraphReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check the shipped tables against the canonical order.
pub fn validate_canonical_graph() -> GraphReport {
    validate_graph(
        &TransitionTable::canonical(),
        &BoundaryTable::canonical(),
        &CANONICAL_ORDER,
    )
}

/// Detect drift between the ordered state list, the transition table and
/// the automation boundaries.
pub fn validate_graph(
    table: &TransitionTable,
    boundaries: &BoundaryTable,
    order: &[WorkflowState],
) -> GraphReport {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for state in order {
        if !seen.insert(*state) {
            errors.push(format!("state {state} appears more than once in the ordered list"));
        }
    }
    for state in WorkflowState::ALL {
        if !seen.contains(&state) {
            errors.push(format!("state {state} is missing from the ordered list"));
        }
    }

    let steps: Vec<u8> = order.iter().filter_map(|state| state.primary_step()).collect();
    for (expected, actual) in steps.iter().enumerate() {
        if usize::from(*actual) != expected {
            errors.push(format!(
                "ordered list has a gap: position {expected} holds step {actual}"
            ));
            break;
        }
    }
    if steps.len() != 10 {
        errors.push(format!(
            "ordered list holds {} primary steps, expected steps 0 through 9",
            steps.len()
        ));
    }

    let position = |state: WorkflowState| order.iter().position(|s| *s == state);

    for edge in table.edges() {
        if position(edge.to).is_none() {
            errors.push(format!(
                "edge {} --{}--> {} targets a state outside the ordered list",
                edge.from, edge.event, edge.to
            ));
        }
        if edge.from.is_terminal() {
            errors.push(format!(
                "terminal state {} has outgoing edge {}",
                edge.from, edge.event
            ));
        }
    }

    for state in order.iter().copied().filter(|s| !s.is_terminal()) {
        if table.outgoing(state).next().is_none() {
            errors.push(format!("state {state} has no legal outgoing transition"));
            continue;
        }
        for exit in [WorkflowEvent::Fail, WorkflowEvent::Cancel] {
            if table.edge(state, exit).is_none() {
                errors.push(format!("state {state} does not accept {exit}"));
            }
        }
        let forward: Vec<_> = table
            .outgoing(state)
            .filter(|edge| edge.kind == EdgeKind::Forward)
            .collect();
        match forward.as_slice() {
            [edge] => {
                if let (Some(from), Some(to)) = (position(edge.from), position(edge.to)) {
                    if to <= from {
                        errors.push(format!(
                            "forward edge {} --{}--> {} does not advance",
                            edge.from, edge.event, edge.to
                        ));
                    }
                }
            }
            [] => errors.push(format!("state {state} has no happy-path transition")),
            _ => errors.push(format!(
                "state {state} has {} happy-path transitions",
                forward.len()
            )),
        }
    }

    let reachable = reachable_from(table, WorkflowState::Step0Init);
    for state in order.iter().copied().filter(|s| !s.is_terminal()) {
        if !reachable.contains(&state) {
            errors.push(format!("state {state} is unreachable from step_0_init"));
        }
    }

    for boundary in boundaries.iter() {
        if table.edge(boundary.state, boundary.required_event).is_none() {
            errors.push(format!(
                "automation boundary {} on {} has no matching transition",
                boundary.emits, boundary.state
            ));
        }
    }

    GraphReport::from_errors(errors)
}

fn reachable_from(table: &TransitionTable, start: WorkflowState) -> HashSet<WorkflowState> {
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(state) = queue.pop_front() {
        for edge in table.outgoing(state) {
            if visited.insert(edge.to) {
                queue.push_back(edge.to);
            }
        }
    }
    visited
}
