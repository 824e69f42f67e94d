//! Perceptix Control - operator CLI for the Perceptix daemon
//!
//! Runs cycles in-process against the shared database, inspects incident
//! history, and works the remediation approval queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "perceptixctl")]
#[command(about = "Perceptix - incident lifecycle orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run observation cycles
    Cycle {
        /// Number of cycles to run
        #[arg(long, default_value_t = 1)]
        count: u64,

        /// Demo scenario (SCHEMA, FRESHNESS, HEALTHY)
        #[arg(long)]
        scenario: Option<String>,

        /// Force the schema-change failure scenario
        #[arg(long, conflicts_with = "scenario")]
        simulate_failure: bool,
    },

    /// List recent incidents
    Incidents {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List loaded remediation playbooks
    Playbooks,

    /// Manage remediation approvals
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List pending approval requests
    List,

    /// Approve a pending remediation (executes its playbook)
    Approve {
        token: String,

        #[arg(long, default_value = "operator")]
        approver: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject a pending remediation
    Reject {
        token: String,

        #[arg(long, default_value = "operator")]
        rejector: String,

        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Cycle {
            count,
            scenario,
            simulate_failure,
        } => commands::cycle(count, scenario, simulate_failure).await,
        Commands::Incidents { limit } => commands::incidents(limit),
        Commands::Playbooks => commands::playbooks(),
        Commands::Approvals { action } => match action {
            ApprovalAction::List => commands::approvals_list(),
            ApprovalAction::Approve {
                token,
                approver,
                comment,
            } => commands::approve(&token, &approver, comment.as_deref()).await,
            ApprovalAction::Reject {
                token,
                rejector,
                reason,
            } => commands::reject(&token, &rejector, reason.as_deref()),
        },
        Commands::Status => commands::status(),
    }
}
