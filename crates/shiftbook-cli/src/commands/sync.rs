use std::sync::Arc;

use serde::Serialize;
use shiftbook_core::sync::{DownloadOutcome, PendingApply, StdFileOps, UploadOutcome};

use crate::commands::common::{format_timestamp, parse_dispute_id, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub marker: i64,
    pub marker_label: String,
    pub remote_modified_at: Option<i64>,
    pub conflicted: bool,
    pub pending: bool,
    pub remote_error: Option<String>,
}

pub async fn run_status(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let coordinator = ctx.coordinator().await?;
    let status = coordinator.status().await;
    let report = StatusReport {
        db_path: ctx.db_path.display().to_string(),
        marker: status.marker,
        marker_label: format_timestamp(status.marker),
        remote_modified_at: status.remote_modified_at,
        conflicted: status.conflicted,
        pending: status.pending,
        remote_error: status.remote_error,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let remote = match (report.remote_modified_at, report.remote_error.as_deref()) {
        (Some(0), _) => "no remote copy yet".to_string(),
        (Some(timestamp), _) => format_timestamp(timestamp),
        (None, Some(error)) => format!("unknown ({error})"),
        (None, None) => "unknown".to_string(),
    };
    let mut lines = vec![
        format!("Database:  {}", report.db_path),
        format!("Last sync: {}", report.marker_label),
        format!("Remote:    {remote}"),
        format!(
            "Upload:    {}",
            if report.conflicted {
                "blocked (remote has changes this machine has not seen)"
            } else {
                "safe"
            }
        ),
    ];
    if report.pending {
        lines.push("Pending:   a downloaded copy is waiting to be applied".to_string());
    }
    lines
}

pub async fn run_push(ctx: &Context) -> Result<(), CliError> {
    let coordinator = ctx.coordinator().await?;
    match coordinator.upload("cli push", None).await {
        UploadOutcome::Uploaded { modified_at } => {
            println!("Uploaded ({})", format_timestamp(modified_at));
            Ok(())
        }
        UploadOutcome::Throttled => Err(CliError::SyncFailed(
            "Upload attempted too soon after the previous one".to_string(),
        )),
        UploadOutcome::Conflicted { remote, marker } => Err(CliError::SyncFailed(format!(
            "Upload refused: remote {} vs last sync {}. Run `shiftbook pull --apply` or `shiftbook merge <dispute>` first.",
            remote.map_or_else(|| "unknown".to_string(), format_timestamp),
            format_timestamp(marker)
        ))),
        UploadOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}

pub async fn run_pull(ctx: &Context, apply: bool) -> Result<(), CliError> {
    let coordinator = ctx.coordinator().await?;
    match coordinator.download_latest(apply).await {
        DownloadOutcome::Downloaded { path, modified_at } => {
            println!(
                "Downloaded remote copy from {} to {}",
                format_timestamp(modified_at),
                path.display()
            );
            Ok(())
        }
        DownloadOutcome::Applied { modified_at } => {
            println!("Local database replaced with remote copy from {}", format_timestamp(modified_at));
            Ok(())
        }
        DownloadOutcome::Parked { pending_path } => {
            println!(
                "Local database is in use; download parked at {} and applied on next open",
                pending_path.display()
            );
            Ok(())
        }
        DownloadOutcome::NoRemote => {
            println!("No remote copy yet");
            Ok(())
        }
        DownloadOutcome::Throttled => Err(CliError::SyncFailed(
            "Download attempted too soon after the previous one".to_string(),
        )),
        DownloadOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}

pub async fn run_merge(ctx: &Context, dispute: &str) -> Result<(), CliError> {
    let id = parse_dispute_id(dispute)?;
    let coordinator = ctx.coordinator().await?;
    if coordinator.merge_aggregate(&id).await? {
        println!("Merged remote changes into dispute {id}");
    } else {
        println!("Nothing new for dispute {id}");
    }
    Ok(())
}

pub async fn run_startup(ctx: &Context) -> Result<(), CliError> {
    let coordinator = ctx.coordinator().await?;
    if coordinator.run_startup_sync().await {
        println!("Pulled newer remote copy");
    } else {
        println!("Local database is current");
    }
    Ok(())
}

/// Runs before any connection is opened so the live file is free.
pub async fn run_apply_pending(ctx: &Context) -> Result<(), CliError> {
    let pending = PendingApply::new(&ctx.db_path, &ctx.settings, Arc::new(StdFileOps));
    if !pending.has_pending() {
        println!("No pending download");
        return Ok(());
    }

    if pending.apply_pending_if_any().await {
        println!("Applied pending download");
        Ok(())
    } else {
        Err(CliError::SyncFailed(format!(
            "Database is still locked; {} kept for the next attempt",
            pending.pending_path().display()
        )))
    }
}
