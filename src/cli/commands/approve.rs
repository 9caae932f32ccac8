use anyhow::Result;

use super::workflow::print_outcome;
use super::CommandContext;
use crate::bootstrap::Runtime;
use crate::workflow::{ApprovalRequest, WorkflowId};

pub async fn decide(
    runtime: &Runtime,
    ctx: &CommandContext,
    workflow_id: &WorkflowId,
    request: &ApprovalRequest,
) -> Result<()> {
    let record = runtime
        .approvals
        .record_decision(workflow_id, &ctx.organization()?, &ctx.actor, request)
        .await?;

    ctx.output(&record, |record| {
        println!(
            "✅ {} {}/{} for workflow {}",
            record.decision, record.entity_type, record.entity_id, record.workflow_id
        );
    })
}

pub async fn approve_seeds(
    runtime: &Runtime,
    ctx: &CommandContext,
    workflow_id: &WorkflowId,
) -> Result<()> {
    let outcome = runtime
        .approvals
        .approve_seeds(workflow_id, &ctx.organization()?, &ctx.actor)
        .await?;
    ctx.output(&outcome, print_outcome)
}

pub async fn approve_subtopics(
    runtime: &Runtime,
    ctx: &CommandContext,
    workflow_id: &WorkflowId,
) -> Result<()> {
    let outcome = runtime
        .approvals
        .approve_subtopics(workflow_id, &ctx.organization()?, &ctx.actor)
        .await?;
    ctx.output(&outcome, print_outcome)
}
