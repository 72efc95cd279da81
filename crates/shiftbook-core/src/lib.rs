//! shiftbook-core - Core library for Shiftbook
//!
//! Models, the SQLite database layer and the replication subsystem that keeps
//! one database file in step across machines through a remote object store.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Dispute, DisputeId};
pub use services::DatabaseService;
pub use sync::SyncCoordinator;
