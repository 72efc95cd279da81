//! Replication of the local database through a remote object store.

mod coordinator;
pub mod fs_ops;
mod marker;
mod merge;
mod pending;
mod snapshot;
mod tasks;

pub use coordinator::{is_conflicted, DownloadOutcome, SyncCoordinator, SyncStatus, UploadOutcome};
pub use fs_ops::{FileOps, StdFileOps};
pub use marker::ConflictMarker;
pub use merge::{merge_dispute_from_snapshot, table_columns, MergeReport};
pub use pending::{pending_path_for, PendingApply};
pub use snapshot::{SnapshotKind, SnapshotManager};
pub use tasks::BackgroundTasks;
