use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shiftbook_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Message body cannot be empty")]
    EmptyBody,
    #[error("Invalid dispute id: {0}")]
    InvalidDisputeId(String),
    #[error("Dispute not found: {0}")]
    DisputeNotFound(String),
    #[error(
        "No remote store configured. Pass --remote-dir, set SHIFTBOOK_DRIVE_TOKEN, or set the R2_* variables."
    )]
    RemoteNotConfigured,
    #[error("{0}")]
    SyncFailed(String),
}
