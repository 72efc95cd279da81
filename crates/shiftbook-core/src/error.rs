//! Error types for shiftbook-core

use thiserror::Error;

/// Result type alias using shiftbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shiftbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network transport error while talking to the remote store
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Credential could not be obtained for the remote store
    #[error("Auth error: {0}")]
    Auth(String),
}
