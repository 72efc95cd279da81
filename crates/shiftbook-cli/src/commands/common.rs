use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use shiftbook_core::auth::StaticToken;
use shiftbook_core::config::SyncSettings;
use shiftbook_core::models::{Dispute, DisputeMessage, DisputeStatus, MessageRole};
use shiftbook_core::remote::{DirectoryStore, DriveStore, R2Config, R2Store, RemoteStore};
use shiftbook_core::sync::StdFileOps;
use shiftbook_core::{DatabaseService, DisputeId, SyncCoordinator};

use crate::cli::{RoleArg, StatusArg};
use crate::error::CliError;

const ENV_DB_PATH: &str = "SHIFTBOOK_DB_PATH";
const ENV_DRIVE_TOKEN: &str = "SHIFTBOOK_DRIVE_TOKEN";

/// Everything a command needs to reach the local database and the remote.
pub struct Context {
    pub db_path: PathBuf,
    pub remote_dir: Option<PathBuf>,
    pub settings: SyncSettings,
}

impl Context {
    pub async fn open_database(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path_with(&self.db_path, &self.settings, Arc::new(StdFileOps)).await?)
    }

    /// The configured remote, `None` when nothing is configured.
    pub fn remote(&self) -> Result<Option<Arc<dyn RemoteStore>>, CliError> {
        build_remote(self.remote_dir.as_deref(), |key| env::var(key).ok())
    }

    pub async fn coordinator(&self) -> Result<Arc<SyncCoordinator>, CliError> {
        let db = self.open_database().await?;
        self.coordinator_for(db)
    }

    pub fn coordinator_for(&self, db: DatabaseService) -> Result<Arc<SyncCoordinator>, CliError> {
        let remote = self.remote()?.ok_or(CliError::RemoteNotConfigured)?;
        let coordinator = SyncCoordinator::new(remote, db, self.settings.clone())?;
        Ok(Arc::new(coordinator))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shiftbook")
        .join("shiftbook.db")
}

pub fn load_settings(path: Option<&Path>) -> Result<SyncSettings, CliError> {
    match path {
        Some(path) => Ok(SyncSettings::load_from_path(path)?),
        None => Ok(SyncSettings::from_env()?),
    }
}

/// Pick a backend: `--remote-dir`, then a Drive token, then R2 variables.
pub fn build_remote(
    remote_dir: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<Arc<dyn RemoteStore>>, CliError> {
    if let Some(dir) = remote_dir {
        tracing::debug!("Using directory remote at {}", dir.display());
        return Ok(Some(Arc::new(DirectoryStore::new(dir))));
    }

    if let Some(token) = lookup(ENV_DRIVE_TOKEN).filter(|value| !value.trim().is_empty()) {
        let store = DriveStore::new(Arc::new(StaticToken::new(token)?))?;
        return Ok(Some(Arc::new(store)));
    }

    if let Some(config) = R2Config::from_env()? {
        tracing::debug!("Using R2 bucket '{}'", config.bucket);
        return Ok(Some(Arc::new(R2Store::new(config))));
    }

    Ok(None)
}

pub fn parse_dispute_id(raw: &str) -> Result<DisputeId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidDisputeId(trimmed.to_string()))
}

pub fn normalize_body(parts: &[String]) -> Option<String> {
    let joined = parts.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub const fn status_from_arg(status: StatusArg) -> DisputeStatus {
    match status {
        StatusArg::Pending => DisputeStatus::Pending,
        StatusArg::Approved => DisputeStatus::Approved,
        StatusArg::Rejected => DisputeStatus::Rejected,
        StatusArg::Resolved => DisputeStatus::Resolved,
    }
}

pub const fn role_from_arg(role: RoleArg) -> MessageRole {
    match role {
        RoleArg::Employee => MessageRole::Employee,
        RoleArg::Manager => MessageRole::Manager,
    }
}

/// `never` for zero, otherwise a UTC timestamp label.
pub fn format_timestamp(timestamp: i64) -> String {
    if timestamp <= 0 {
        return "never".to_string();
    }
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map_or_else(
            || timestamp.to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

pub fn format_dispute_line(dispute: &Dispute) -> String {
    let decided = dispute
        .decided_by
        .as_deref()
        .map(|by| format!(" by {by}"))
        .unwrap_or_default();
    format!(
        "{}  {:<9} {}  opened by {}{decided}",
        dispute.id,
        dispute.status.as_str(),
        dispute.shift_ref,
        dispute.opened_by
    )
}

pub fn format_message_line(message: &DisputeMessage) -> String {
    let status = message
        .status_code
        .map(|status| format!(" [{}]", status.as_str()))
        .unwrap_or_default();
    format!(
        "{} {} ({}){status}: {}",
        format_timestamp(message.created_at),
        message.author,
        message.role.as_str(),
        message.body
    )
}
