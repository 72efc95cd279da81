//! Replication settings shared by the desktop app and the CLI.
//!
//! Defaults carry the protocol constants (3 s call floor, 3 snapshot copy
//! attempts 150 ms apart, 6 pending-apply attempts 250 ms apart). Any field
//! can be overridden from a JSON file or from `SHIFTBOOK_SYNC_*` variables.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::normalize_text_option;
use crate::{Error, Result};

const ENV_FOLDER_NAME: &str = "SHIFTBOOK_SYNC_FOLDER";
const ENV_OBJECT_NAME: &str = "SHIFTBOOK_SYNC_OBJECT";
const ENV_MIN_CALL_INTERVAL_MS: &str = "SHIFTBOOK_SYNC_MIN_INTERVAL_MS";
const ENV_MAX_BACKGROUND_TASKS: &str = "SHIFTBOOK_SYNC_MAX_TASKS";

/// Name of the marker file kept beside the database.
pub const MARKER_FILE_NAME: &str = "last_cloud_sync_ts.txt";
/// Scratch directory for snapshots, relative to the database directory.
pub const SCRATCH_DIR_NAME: &str = "_sync_tmp";

/// Tunables for the replication subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    /// Rendezvous folder on the remote store
    pub folder_name: String,
    /// Object name inside the rendezvous folder
    pub object_name: String,
    /// Minimum gap between two calls of the same kind
    pub min_call_interval_ms: u64,
    /// Snapshot copy attempts before giving up
    pub snapshot_attempts: u32,
    /// Pause between snapshot copy attempts
    pub snapshot_retry_delay_ms: u64,
    /// Pending artifact apply attempts per open
    pub pending_attempts: u32,
    /// Pause between pending apply attempts
    pub pending_retry_delay_ms: u64,
    /// Concurrent background sync tasks
    pub max_background_tasks: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            folder_name: "ShiftbookSync".to_string(),
            object_name: "shiftbook.db".to_string(),
            min_call_interval_ms: 3_000,
            snapshot_attempts: 3,
            snapshot_retry_delay_ms: 150,
            pending_attempts: 6,
            pending_retry_delay_ms: 250,
            max_background_tasks: 2,
        }
    }
}

impl SyncSettings {
    /// Defaults overlaid with `SHIFTBOOK_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        parse_settings(Self::default(), |key| env::var(key).ok())
    }

    /// Load settings from a JSON file, falling back to defaults when it does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub const fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub const fn snapshot_retry_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_retry_delay_ms)
    }

    pub const fn pending_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pending_retry_delay_ms)
    }

    /// Settings without the call floor, for tests and scripted runs.
    #[must_use]
    pub const fn without_rate_limit(mut self) -> Self {
        self.min_call_interval_ms = 0;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.folder_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Sync folder name must not be empty".to_string(),
            ));
        }
        if self.object_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Sync object name must not be empty".to_string(),
            ));
        }
        if self.snapshot_attempts == 0 || self.pending_attempts == 0 {
            return Err(Error::InvalidInput(
                "Retry attempt counts must be at least 1".to_string(),
            ));
        }
        if self.max_background_tasks == 0 {
            return Err(Error::InvalidInput(
                "At least one background task slot is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_settings(
    mut settings: SyncSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncSettings> {
    if let Some(folder) = normalize_text_option(lookup(ENV_FOLDER_NAME)) {
        settings.folder_name = folder;
    }
    if let Some(object) = normalize_text_option(lookup(ENV_OBJECT_NAME)) {
        settings.object_name = object;
    }
    if let Some(raw) = normalize_text_option(lookup(ENV_MIN_CALL_INTERVAL_MS)) {
        settings.min_call_interval_ms = raw.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "{ENV_MIN_CALL_INTERVAL_MS} must be a whole number of milliseconds"
            ))
        })?;
    }
    if let Some(raw) = normalize_text_option(lookup(ENV_MAX_BACKGROUND_TASKS)) {
        settings.max_background_tasks = raw.parse().map_err(|_| {
            Error::InvalidInput(format!("{ENV_MAX_BACKGROUND_TASKS} must be a number"))
        })?;
    }

    settings.validate()?;
    Ok(settings)
}
