//! Conflict marker: the last remote timestamp this replica is known to match.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::MARKER_FILE_NAME;

/// Marker file beside the local database, holding epoch seconds as decimal text.
///
/// `0` means no remote state has been observed. The sync coordinator writes it
/// under its lock; pending recovery writes it before any connection is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    path: PathBuf,
}

impl ConflictMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker stored next to `db_path`.
    pub fn beside(db_path: &Path) -> Self {
        Self::new(db_path.with_file_name(MARKER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value; absent or unparsable files read as `0`.
    pub fn load(&self) -> i64 {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw.trim().parse::<i64>().map_or_else(
                |_| {
                    tracing::warn!(
                        "Ignoring unparsable sync marker at {}",
                        self.path.display()
                    );
                    0
                },
                |value| value.max(0),
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
            Err(error) => {
                tracing::warn!(
                    "Failed to read sync marker at {}: {}",
                    self.path.display(),
                    error
                );
                0
            }
        }
    }

    /// Persist a new value. Failures are logged, never returned.
    pub fn save(&self, timestamp: i64) {
        if let Err(error) = self.write(timestamp) {
            tracing::warn!(
                "Failed to persist sync marker {} at {}: {}",
                timestamp,
                self.path.display(),
                error
            );
        } else {
            tracing::debug!("Sync marker advanced to {timestamp}");
        }
    }

    fn write(&self, timestamp: i64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Readers see the old value or the new one, never a partial write.
        let staging = self.path.with_extension("txt.tmp");
        std::fs::write(&staging, timestamp.to_string())?;
        std::fs::rename(&staging, &self.path)
    }
}
