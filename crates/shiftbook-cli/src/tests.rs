use std::path::Path;

use pretty_assertions::assert_eq;
use shiftbook_core::config::{SyncSettings, MARKER_FILE_NAME};
use shiftbook_core::models::{DisputeStatus, MessageRole};

use crate::cli::{RoleArg, StatusArg};
use crate::commands::common::{
    build_remote, format_timestamp, normalize_body, parse_dispute_id, role_from_arg,
    status_from_arg, Context,
};
use crate::commands::dispute::{run_decide, run_list, run_new, run_say, run_show};
use crate::commands::sync::{format_status_lines, run_apply_pending, run_push, run_status, StatusReport};
use crate::error::CliError;

fn context(dir: &Path, with_remote: bool) -> Context {
    Context {
        db_path: dir.join("data").join("shiftbook.db"),
        remote_dir: with_remote.then(|| dir.join("cloud")),
        settings: SyncSettings::default().without_rate_limit(),
    }
}

fn report(conflicted: bool, pending: bool) -> StatusReport {
    StatusReport {
        db_path: "/tmp/shiftbook.db".to_string(),
        marker: 0,
        marker_label: "never".to_string(),
        remote_modified_at: Some(0),
        conflicted,
        pending,
        remote_error: None,
    }
}

#[test]
fn normalize_body_joins_and_trims() {
    assert_eq!(
        normalize_body(&["  I worked".to_string(), "9h ".to_string()]),
        Some("I worked 9h".to_string())
    );
    assert_eq!(normalize_body(&[" ".to_string()]), None);
    assert_eq!(normalize_body(&[]), None);
}

#[test]
fn parse_dispute_id_rejects_garbage() {
    assert!(matches!(
        parse_dispute_id("not-a-uuid"),
        Err(CliError::InvalidDisputeId(_))
    ));
    let id = shiftbook_core::DisputeId::new();
    assert_eq!(parse_dispute_id(&format!(" {id} ")).unwrap(), id);
}

#[test]
fn format_timestamp_labels() {
    assert_eq!(format_timestamp(0), "never");
    assert_eq!(format_timestamp(1_709_288_100), "2024-03-01 10:15:00 UTC");
}

#[test]
fn argument_enums_map_to_models() {
    assert_eq!(status_from_arg(StatusArg::Resolved), DisputeStatus::Resolved);
    assert_eq!(status_from_arg(StatusArg::Pending), DisputeStatus::Pending);
    assert_eq!(role_from_arg(RoleArg::Manager), MessageRole::Manager);
}

#[test]
fn remote_dir_takes_precedence_over_drive_token() {
    let remote = build_remote(Some(Path::new("/mnt/share")), |_| Some("token".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(remote.label(), "directory");
}

#[test]
fn drive_token_selects_drive_backend() {
    let remote = build_remote(None, |key| {
        (key == "SHIFTBOOK_DRIVE_TOKEN").then(|| "ya29.token".to_string())
    })
    .unwrap()
    .unwrap();
    assert_eq!(remote.label(), "drive");
}

#[test]
fn status_lines_explain_blocked_upload_and_pending() {
    let lines = format_status_lines(&report(true, true));
    assert!(lines.iter().any(|line| line.contains("blocked")));
    assert!(lines.iter().any(|line| line.starts_with("Pending:")));
    assert!(lines.iter().any(|line| line.contains("no remote copy yet")));

    let lines = format_status_lines(&report(false, false));
    assert!(lines.iter().any(|line| line.ends_with("safe")));
    assert!(!lines.iter().any(|line| line.starts_with("Pending:")));
}

#[tokio::test(flavor = "multi_thread")]
async fn dispute_commands_work_without_a_remote() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), false);

    run_new(&ctx, "shift-1", "ana").await.unwrap();
    let db = ctx.open_database().await.unwrap();
    let dispute = db.list_disputes(1).await.unwrap().remove(0);
    drop(db);

    let id = dispute.id.to_string();
    run_say(&ctx, &id, "lee", RoleArg::Manager, None, &["Looking".to_string()])
        .await
        .unwrap();
    run_decide(&ctx, &id, StatusArg::Approved, "lee").await.unwrap();
    run_show(&ctx, &id, true).await.unwrap();
    run_list(&ctx, 5, false).await.unwrap();

    let db = ctx.open_database().await.unwrap();
    let stored = db.get_dispute(&dispute.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DisputeStatus::Approved);
    assert_eq!(db.messages(&dispute.id).await.unwrap().len(), 1);
    assert!(!ctx.db_path.with_file_name(MARKER_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn say_rejects_empty_body() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), false);
    let id = shiftbook_core::DisputeId::new().to_string();

    let error = run_say(&ctx, &id, "ana", RoleArg::Employee, None, &["  ".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::EmptyBody));
}

#[tokio::test(flavor = "multi_thread")]
async fn show_unknown_dispute_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), false);
    let id = shiftbook_core::DisputeId::new().to_string();

    let error = run_show(&ctx, &id, false).await.unwrap_err();
    assert!(matches!(error, CliError::DisputeNotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn mutation_with_directory_remote_uploads_and_sets_marker() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), true);

    run_new(&ctx, "shift-2", "kim").await.unwrap();

    let settings = SyncSettings::default();
    let uploaded = dir
        .path()
        .join("cloud")
        .join(&settings.folder_name)
        .join(&settings.object_name);
    assert!(uploaded.is_file());

    let marker = std::fs::read_to_string(ctx.db_path.with_file_name(MARKER_FILE_NAME)).unwrap();
    assert!(marker.trim().parse::<i64>().unwrap() > 0);

    run_status(&ctx, true).await.unwrap();
    run_push(&ctx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn push_without_remote_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context {
        remote_dir: None,
        ..context(dir.path(), false)
    };
    if ctx.remote().unwrap().is_some() {
        // Remote credentials in the environment; nothing to check here.
        return;
    }

    assert!(matches!(
        run_push(&ctx).await,
        Err(CliError::RemoteNotConfigured)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn apply_pending_without_artifact_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), false);

    run_apply_pending(&ctx).await.unwrap();
}
