use std::time::Duration;

use serde::Serialize;
use shiftbook_core::models::{Dispute, DisputeMessage};
use shiftbook_core::DatabaseService;

use crate::cli::{RoleArg, StatusArg};
use crate::commands::common::{
    format_dispute_line, format_message_line, normalize_body, parse_dispute_id, role_from_arg,
    status_from_arg, Context,
};
use crate::error::CliError;

/// How long a command waits for its background upload before exiting.
const UPLOAD_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
pub struct DisputeView {
    #[serde(flatten)]
    pub dispute: Dispute,
    pub messages: Vec<DisputeMessage>,
}

pub async fn run_new(ctx: &Context, shift_ref: &str, by: &str) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let dispute = db.open_dispute(shift_ref, by).await?;
    println!("{}", dispute.id);
    replicate_after_mutation(ctx, db, "dispute opened").await
}

pub async fn run_say(
    ctx: &Context,
    id: &str,
    by: &str,
    role: RoleArg,
    status: Option<StatusArg>,
    body: &[String],
) -> Result<(), CliError> {
    let id = parse_dispute_id(id)?;
    let body = normalize_body(body).ok_or(CliError::EmptyBody)?;
    let db = ctx.open_database().await?;
    let message = db
        .post_message(&id, by, role_from_arg(role), &body, status.map(status_from_arg))
        .await?;
    println!("{}", format_message_line(&message));
    replicate_after_mutation(ctx, db, "dispute message").await
}

pub async fn run_decide(ctx: &Context, id: &str, status: StatusArg, by: &str) -> Result<(), CliError> {
    let id = parse_dispute_id(id)?;
    let db = ctx.open_database().await?;
    let dispute = db.decide(&id, status_from_arg(status), by).await?;
    println!("{}", format_dispute_line(&dispute));
    replicate_after_mutation(ctx, db, "dispute decision").await
}

pub async fn run_show(ctx: &Context, id: &str, as_json: bool) -> Result<(), CliError> {
    let id = parse_dispute_id(id)?;
    let db = ctx.open_database().await?;
    let dispute = db
        .get_dispute(&id)
        .await?
        .ok_or_else(|| CliError::DisputeNotFound(id.to_string()))?;
    let messages = db.messages(&id).await?;

    if as_json {
        let view = DisputeView { dispute, messages };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{}", format_dispute_line(&dispute));
    for message in &messages {
        println!("  {}", format_message_line(message));
    }
    Ok(())
}

pub async fn run_list(ctx: &Context, limit: usize, as_json: bool) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let disputes = db.list_disputes(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&disputes)?);
    } else if disputes.is_empty() {
        println!("No disputes recorded.");
    } else {
        for dispute in &disputes {
            println!("{}", format_dispute_line(dispute));
        }
    }
    Ok(())
}

/// Snapshot and upload in the background, then wait for it before exiting.
///
/// A missing remote keeps the change local; a refused upload is only logged.
async fn replicate_after_mutation(
    ctx: &Context,
    db: DatabaseService,
    tag: &str,
) -> Result<(), CliError> {
    if ctx.remote()?.is_none() {
        tracing::debug!("No remote configured; {tag} stays local");
        return Ok(());
    }

    let coordinator = ctx.coordinator_for(db)?;
    coordinator.schedule_upload(tag);
    if !coordinator.shutdown(UPLOAD_WAIT).await {
        tracing::warn!("Upload after {tag} did not finish within {UPLOAD_WAIT:?}");
    }
    Ok(())
}
