use anyhow::Result;
use serde::Serialize;

use super::CommandContext;
use crate::workflow::{
    current_step, validate_canonical_graph, TransitionTable, WorkflowEvent, WorkflowState,
    CANONICAL_ORDER,
};

pub fn check_graph(ctx: &CommandContext) -> Result<()> {
    let report = validate_canonical_graph();
    ctx.output(&report, |report| {
        if report.valid {
            println!("✅ Transition graph is valid ({} states)", CANONICAL_ORDER.len());
        } else {
            println!("❌ Transition graph is invalid:");
            for problem in &report.errors {
                println!("   • {problem}");
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct StepRow {
    state: WorkflowState,
    label: &'static str,
    step: Option<u8>,
    terminal: bool,
    valid_events: Vec<WorkflowEvent>,
}

pub fn steps(ctx: &CommandContext) -> Result<()> {
    let table = TransitionTable::canonical();
    let rows: Vec<StepRow> = CANONICAL_ORDER
        .iter()
        .map(|&state| StepRow {
            state,
            label: state.label(),
            step: current_step(state),
            terminal: state.is_terminal(),
            valid_events: table.valid_events(state),
        })
        .collect();

    ctx.output(&rows, |rows| {
        println!("📋 WORKFLOW STATES");
        println!("──────────────────");
        for row in rows {
            let step = row
                .step
                .map(|s| format!("step {s}"))
                .unwrap_or_else(|| "-".to_string());
            let events = row
                .valid_events
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "{:<20} {:<8} {:<28} {}",
                row.state.as_str(),
                step,
                row.label,
                if events.is_empty() { "(terminal)".to_string() } else { events }
            );
        }
    })
}
