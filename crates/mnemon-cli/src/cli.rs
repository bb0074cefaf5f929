use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mnemon", about = "Pattern-intelligence control plane")]
pub struct Cli {
    /// Base URL of a running mnemon API, for the inspection commands.
    #[arg(long, global = true, env = "MNEMON_REMOTE")]
    pub remote: Option<String>,

    /// Bearer token for the remote API.
    #[arg(long, global = true, env = "MNEMON_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the service: boot handshake, contracts, consumer fleet, read API.
    Serve,
    /// Apply pending schema migrations.
    Migrate,
    /// Roll the schema back to the given version.
    Rollback {
        #[arg(long)]
        to: i32,
    },
    /// Show service status from a running instance.
    Status,
    /// List learned patterns.
    Patterns {
        /// Filter by lifecycle status (e.g. VALIDATED).
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show one FSM instance and its history.
    Fsm {
        /// ingestion | pattern_learning | quality_assessment
        kind: String,
        entity: String,
    },
    /// List quarantined messages.
    Quarantine,
}
