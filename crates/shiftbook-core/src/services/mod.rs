//! Services shared by the app shell and the CLI.

mod database;

pub use database::DatabaseService;
