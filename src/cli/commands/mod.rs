use anyhow::{anyhow, Result};
use serde::Serialize;

use super::{Cli, Commands, GateCommands};
use crate::bootstrap::{self, Runtime};
use crate::config::IntentWorkflowConfig;
use crate::workflow::{ActorId, OrganizationId};

pub mod approve;
pub mod gate;
pub mod graph;
pub mod init_config;
pub mod reconcile;
pub mod workflow;

/// Per-invocation options shared by every command
pub struct CommandContext {
    pub organization_id: Option<OrganizationId>,
    pub actor: ActorId,
    pub json: bool,
}

impl CommandContext {
    pub fn organization(&self) -> Result<OrganizationId> {
        self.organization_id
            .ok_or_else(|| anyhow!("--org <ORGANIZATION_ID> is required for this command"))
    }

    /// Print `value` as JSON, or run the human-readable renderer
    pub fn output<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

/// Run one CLI invocation. The transition graph is validated before any
/// command does work.
pub async fn run(cli: Cli, config: &IntentWorkflowConfig) -> Result<()> {
    bootstrap::validate_startup()?;

    let ctx = CommandContext {
        organization_id: cli.org,
        actor: ActorId::new(cli.actor),
        json: cli.json,
    };

    match cli.command {
        Commands::CheckGraph => graph::check_graph(&ctx),
        Commands::Steps => graph::steps(&ctx),
        Commands::InitConfig { path, force } => init_config::InitConfigCommand::new(path, force)
            .execute(config),
        Commands::Gate {
            gate: GateCommands::Step { state, target },
        } => gate::step(&ctx, &state, target),
        command => {
            let runtime = bootstrap::boot(config).await?;
            dispatch(command, &runtime, &ctx).await
        }
    }
}

async fn dispatch(command: Commands, runtime: &Runtime, ctx: &CommandContext) -> Result<()> {
    match command {
        Commands::Create => workflow::create(runtime, ctx).await,
        Commands::Show { workflow_id } => workflow::show(runtime, ctx, &workflow_id).await,
        Commands::Transition {
            workflow_id,
            event,
            reason,
        } => workflow::transition(runtime, ctx, &workflow_id, &event, reason).await,
        Commands::Decide {
            workflow_id,
            entity_type,
            entity_id,
            decision,
            feedback,
        } => {
            let request = crate::workflow::ApprovalRequest {
                entity_type,
                entity_id,
                decision,
                feedback,
            };
            approve::decide(runtime, ctx, &workflow_id, &request).await
        }
        Commands::ApproveSeeds { workflow_id } => {
            approve::approve_seeds(runtime, ctx, &workflow_id).await
        }
        Commands::ApproveSubtopics { workflow_id } => {
            approve::approve_subtopics(runtime, ctx, &workflow_id).await
        }
        Commands::Gate { gate } => match gate {
            GateCommands::Icp { workflow_id } => gate::icp(runtime, ctx, &workflow_id).await,
            GateCommands::Subtopics { workflow_id } => {
                gate::subtopics(runtime, ctx, &workflow_id).await
            }
            GateCommands::Step { .. } => Ok(()),
        },
        Commands::Reconcile { limit } => reconcile::reconcile(runtime, ctx, limit).await,
        // handled before the runtime is built
        Commands::CheckGraph | Commands::Steps | Commands::InitConfig { .. } => Ok(()),
    }
}
