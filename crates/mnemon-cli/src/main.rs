mod cli;
mod commands;
mod output;
mod serve;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve::serve().await,
        Command::Migrate => commands::migrate().await,
        Command::Rollback { to } => commands::rollback(to).await,
        Command::Status => commands::status(cli.remote, cli.token).await,
        Command::Patterns { status, limit } => {
            commands::patterns(status, limit, cli.remote, cli.token).await
        }
        Command::Fsm { kind, entity } => {
            commands::fsm(kind, entity, cli.remote, cli.token).await
        }
        Command::Quarantine => commands::quarantine(cli.remote, cli.token).await,
    }
}
