use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::workflow::{OrganizationId, WorkflowId};

pub mod commands;

#[derive(Parser)]
#[command(name = "intent-workflow")]
#[command(about = "Keyword research workflow state machine")]
#[command(long_about = "Drives intent workflows through the 10-step keyword research pipeline: \
                       validated transitions, human approval gates, and the automation events \
                       that hand off to background jobs. Run 'intent-workflow check-graph' to \
                       verify the transition table.")]
pub struct Cli {
    /// Configuration file layered over intent-workflow.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Organization that owns the workflow
    #[arg(long, global = true)]
    pub org: Option<OrganizationId>,

    /// Who is acting (recorded on step completion and approvals)
    #[arg(long, global = true, default_value = "cli")]
    pub actor: String,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the transition graph against the state taxonomy
    CheckGraph,
    /// List states in canonical order with their step and valid events
    Steps,
    /// Create a workflow in step_0_init
    Create,
    /// Show a workflow's state, step and progress
    Show {
        workflow_id: WorkflowId,
    },
    /// Apply an event to a workflow
    Transition {
        workflow_id: WorkflowId,
        /// Event name, e.g. ICP_COMPLETED
        event: String,
        /// Recorded on the step being left (FAIL / CANCEL)
        #[arg(long)]
        reason: Option<String>,
    },
    /// Record a human approval decision
    Decide {
        workflow_id: WorkflowId,
        #[arg(long, help = "seed_keywords, subtopics, clusters or workflow")]
        entity_type: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long, help = "approved or rejected")]
        decision: String,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Approve seed keywords and start longtail expansion
    ApproveSeeds {
        workflow_id: WorkflowId,
    },
    /// Approve subtopics and queue article generation
    ApproveSubtopics {
        workflow_id: WorkflowId,
    },
    /// Evaluate a gate without changing anything
    Gate {
        #[command(subcommand)]
        gate: GateCommands,
    },
    /// Replay automation events whose delivery failed after the state advanced
    Reconcile {
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Write a configuration file with the default values
    InitConfig {
        #[arg(long, default_value = "intent-workflow.toml")]
        path: PathBuf,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum GateCommands {
    /// May a workflow in STATE open step TARGET?
    Step {
        #[arg(long)]
        state: String,
        #[arg(long)]
        target: u8,
    },
    /// Has the workflow completed ICP generation?
    Icp { workflow_id: WorkflowId },
    /// May the workflow's subtopics be approved?
    Subtopics { workflow_id: WorkflowId },
}
