//! Database layer for Shiftbook

mod connection;
mod migrations;
mod repository;

pub use connection::{CheckpointReport, Database};
pub use repository::{DisputeRepository, SqliteDisputeRepository};
