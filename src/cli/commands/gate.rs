use anyhow::Result;
use serde::Serialize;

use super::CommandContext;
use crate::bootstrap::Runtime;
use crate::workflow::{can_access_step, GateDecision, WorkflowId};

#[derive(Debug, Serialize)]
struct StepAccess<'a> {
    state: &'a str,
    target_step: u8,
    allowed: bool,
}

pub fn step(ctx: &CommandContext, state: &str, target_step: u8) -> Result<()> {
    let access = StepAccess {
        state,
        target_step,
        allowed: can_access_step(state, target_step),
    };
    ctx.output(&access, |access| {
        let verdict = if access.allowed { "✅ allowed" } else { "🔒 denied" };
        println!(
            "{verdict}: step {} from state '{}'",
            access.target_step, access.state
        );
    })
}

pub async fn icp(runtime: &Runtime, ctx: &CommandContext, workflow_id: &WorkflowId) -> Result<()> {
    let decision = runtime
        .icp_gate
        .validate_icp_completion(workflow_id, &ctx.organization()?)
        .await;
    ctx.output(&decision, print_decision)
}

pub async fn subtopics(
    runtime: &Runtime,
    ctx: &CommandContext,
    workflow_id: &WorkflowId,
) -> Result<()> {
    let decision = runtime
        .subtopic_gate
        .validate_subtopic_approval_gate(workflow_id, &ctx.organization()?)
        .await;
    ctx.output(&decision, print_decision)
}

fn print_decision(decision: &GateDecision) {
    let verdict = if decision.allowed { "✅ allowed" } else { "🔒 blocked" };
    println!("{verdict} by {} gate ({:?})", decision.gate, decision.status);
    if let Some(message) = &decision.message {
        println!("   {message}");
    }
    if let Some(error) = &decision.error {
        println!("   error: {error}");
    }
}
