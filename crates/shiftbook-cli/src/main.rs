//! Shiftbook CLI - replicate the shift database through a cloud folder
//!
//! Push, pull, merge and inspect the replication state of the local database,
//! and record dispute activity that is uploaded after each change.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, DisputeCommands};
use crate::commands::common::{load_settings, resolve_db_path, Context};
use crate::commands::{dispute, sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "shiftbook=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context {
        db_path: resolve_db_path(cli.db_path),
        remote_dir: cli.remote_dir,
        settings: load_settings(cli.settings.as_deref())?,
    };

    match cli.command {
        Commands::Status { json } => sync::run_status(&ctx, json).await?,
        Commands::Push => sync::run_push(&ctx).await?,
        Commands::Pull { apply } => sync::run_pull(&ctx, apply).await?,
        Commands::Merge { dispute } => sync::run_merge(&ctx, &dispute).await?,
        Commands::Startup => sync::run_startup(&ctx).await?,
        Commands::ApplyPending => sync::run_apply_pending(&ctx).await?,
        Commands::Dispute { command } => match command {
            DisputeCommands::New { shift_ref, by } => dispute::run_new(&ctx, &shift_ref, &by).await?,
            DisputeCommands::Say {
                id,
                by,
                role,
                status,
                body,
            } => dispute::run_say(&ctx, &id, &by, role, status, &body).await?,
            DisputeCommands::Decide { id, status, by } => {
                dispute::run_decide(&ctx, &id, status, &by).await?;
            }
            DisputeCommands::Show { id, json } => dispute::run_show(&ctx, &id, json).await?,
            DisputeCommands::List { limit, json } => dispute::run_list(&ctx, limit, json).await?,
        },
    }

    Ok(())
}
