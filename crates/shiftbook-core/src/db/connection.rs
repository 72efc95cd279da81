//! Database connection management

use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::migrations;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a WAL checkpoint, as reported by `SQLite`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Another connection prevented the checkpoint from completing
    pub busy: bool,
    /// Frames in the WAL
    pub log_frames: i64,
    /// Frames copied back into the main file
    pub checkpointed_frames: i64,
}

/// Database wrapper for the local `SQLite` file
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        let database = Self {
            conn,
            path: Some(path),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let database = Self { conn, path: None };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open a downloaded snapshot for reading only. No migrations run.
    pub fn open_snapshot_read_only(path: impl AsRef<Path>) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Held in place of the live connection while its file is swapped.
    ///
    /// It has no schema and is query-only, so a write that slips in fails
    /// instead of landing in memory.
    pub fn detached() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(Self { conn, path: None })
    }

    /// Fail unless `path` opens as a database and passes `PRAGMA quick_check`.
    pub fn verify_file(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let conn = Self::open_snapshot_read_only(path)?;
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict != "ok" {
            return Err(Error::Database(format!(
                "{} failed the integrity check: {verdict}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Configure `SQLite` for concurrent readers while the app writes
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" here; that is fine.
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL").ok();
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Flush the write-ahead log into the main file without closing the connection.
    pub fn checkpoint(&self) -> Result<CheckpointReport> {
        self.run_checkpoint("FULL")
    }

    /// Flush and truncate the write-ahead log, used right before the file is swapped out.
    pub fn checkpoint_truncate(&self) -> Result<CheckpointReport> {
        self.run_checkpoint("TRUNCATE")
    }

    fn run_checkpoint(&self, mode: &str) -> Result<CheckpointReport> {
        let report = self.conn.query_row(
            &format!("PRAGMA wal_checkpoint({mode})"),
            [],
            |row| {
                Ok(CheckpointReport {
                    busy: row.get::<_, i64>(0)? != 0,
                    log_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            },
        )?;
        if report.busy {
            tracing::debug!(
                "WAL checkpoint ({mode}) was blocked by another connection; {} of {} frames copied",
                report.checkpointed_frames,
                report.log_frames
            );
        }
        Ok(report)
    }

    /// Close the connection, surfacing any error `SQLite` reports.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, error)| Error::Database(format!("Failed to close database: {error}")))
    }

    /// Filesystem path of the database, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
