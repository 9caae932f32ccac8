use anyhow::Result;

use super::CommandContext;
use crate::bootstrap::Runtime;
use crate::workflow::{
    TransitionOutcome, TransitionRequest, WorkflowError, WorkflowEvent, WorkflowId, WorkflowRecord,
};

pub async fn create(runtime: &Runtime, ctx: &CommandContext) -> Result<()> {
    let record = WorkflowRecord::new(ctx.organization()?);
    runtime
        .stores
        .workflows
        .create(&record)
        .await
        .map_err(|err| WorkflowError::from_store("create workflow", err))?;

    ctx.output(&record, |record| {
        println!("✅ Created workflow {}", record.id);
        println!("   state: {}", record.state);
    })
}

pub async fn show(runtime: &Runtime, ctx: &CommandContext, workflow_id: &WorkflowId) -> Result<()> {
    let record = runtime
        .stores
        .workflows
        .get(workflow_id, &ctx.organization()?)
        .await
        .map_err(|err| WorkflowError::from_store("load workflow", err))?
        .ok_or(WorkflowError::NotFound {
            workflow_id: *workflow_id,
        })?;

    ctx.output(&record, |record| {
        println!("📄 Workflow {}", record.id);
        println!("   state:        {} ({})", record.state, record.state.label());
        match record.current_step() {
            Some(step) => println!("   current step: {step}"),
            None => println!("   current step: -"),
        }
        println!("   updated:      {}", record.updated_at);
        for (step, progress) in &record.steps {
            let status = match (&progress.completed_at, &progress.error_message) {
                (_, Some(message)) => format!("stopped: {message}"),
                (Some(at), None) => format!(
                    "completed {} by {}",
                    at,
                    progress
                        .completed_by
                        .as_ref()
                        .map(|a| a.as_str())
                        .unwrap_or("unknown")
                ),
                (None, None) => "pending".to_string(),
            };
            println!("   step {step}: {status}");
        }
    })
}

pub async fn transition(
    runtime: &Runtime,
    ctx: &CommandContext,
    workflow_id: &WorkflowId,
    event: &str,
    reason: Option<String>,
) -> Result<()> {
    let event: WorkflowEvent = event.parse().map_err(WorkflowError::UnknownEvent)?;
    let mut request =
        TransitionRequest::new(*workflow_id, ctx.organization()?, event, ctx.actor.clone());
    if let Some(reason) = reason {
        request = request.with_reason(reason);
    }

    let outcome = runtime.engine.apply(&request).await?;
    ctx.output(&outcome, print_outcome)
}

pub(crate) fn print_outcome(outcome: &TransitionOutcome) {
    match outcome {
        TransitionOutcome::Applied(applied) => {
            println!("✅ {}", outcome.message());
            if let Some(event) = &applied.emitted {
                println!("   📤 emitted {} ({})", event.name, event.idempotency_key);
            }
            if let Some(event) = &applied.deferred {
                println!(
                    "   ⏸️  deferred {} until a job queue is configured; run `reconcile` later",
                    event.name
                );
            }
        }
        TransitionOutcome::ConcurrentTransition { .. } => {
            println!("⚠️  {}", outcome.message());
        }
    }
}
