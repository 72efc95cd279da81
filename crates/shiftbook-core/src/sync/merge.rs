//! Record-level merge of one dispute from a downloaded snapshot.
//!
//! Only the dispute's decision fields and the rows of its message thread are
//! taken from the remote copy. Everything else stays local-authoritative.
//! Columns are probed on both sides so an older or newer schema merges on the
//! columns the two files share.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::db::Database;
use crate::models::DisputeId;
use crate::Result;

const DISPUTES_TABLE: &str = "disputes";
const MESSAGES_TABLE: &str = "dispute_messages";
const STATUS_COLUMNS: [&str; 4] = ["status", "decided_by", "decided_at", "closed_at"];
const MESSAGE_COLUMNS: [&str; 7] = [
    "id",
    "dispute_id",
    "author",
    "role",
    "body",
    "status_code",
    "created_at",
];

/// What a merge pass changed locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// The dispute was missing locally and was copied over whole
    pub dispute_created: bool,
    /// Decision columns that took the remote value
    pub status_changed: Vec<String>,
    /// Message rows that were new to this replica
    pub inserted_messages: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.dispute_created || !self.status_changed.is_empty() || self.inserted_messages > 0
    }
}

/// Column names of `table`, empty when the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(columns)
}

fn shared_columns<'a>(
    wanted: impl IntoIterator<Item = &'a str>,
    local: &HashSet<String>,
    remote: &HashSet<String>,
) -> Vec<&'a str> {
    wanted
        .into_iter()
        .filter(|column| local.contains(*column) && remote.contains(*column))
        .collect()
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn read_row(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    key_column: &str,
    key: &str,
) -> Result<Option<Vec<Value>>> {
    let sql = format!(
        "SELECT {} FROM \"{table}\" WHERE \"{key_column}\" = ?",
        column_list(columns)
    );
    let row = conn
        .query_row(&sql, [key], |row| {
            (0..columns.len())
                .map(|index| row.get::<_, Value>(index))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .optional()?;
    Ok(row)
}

/// Merge dispute `id` from the snapshot at `snapshot` into `local`.
///
/// The snapshot is opened read-only and closed before returning. All local
/// writes happen in one transaction.
pub fn merge_dispute_from_snapshot(
    local: &Connection,
    snapshot: &Path,
    id: &DisputeId,
) -> Result<MergeReport> {
    let remote = Database::open_snapshot_read_only(snapshot)?;
    let key = id.as_str();
    let mut report = MergeReport::default();

    let local_dispute_columns = table_columns(local, DISPUTES_TABLE)?;
    let remote_dispute_columns = table_columns(&remote, DISPUTES_TABLE)?;
    if !remote_dispute_columns.contains("id") || !local_dispute_columns.contains("id") {
        tracing::warn!("Snapshot {} has no usable disputes table", snapshot.display());
        return Ok(report);
    }

    let tx = local.unchecked_transaction()?;

    let local_exists = read_row(&tx, DISPUTES_TABLE, &["id"], "id", &key)?.is_some();
    if local_exists {
        let status_columns = shared_columns(
            STATUS_COLUMNS,
            &local_dispute_columns,
            &remote_dispute_columns,
        );
        if !status_columns.is_empty() {
            let remote_values = read_row(&remote, DISPUTES_TABLE, &status_columns, "id", &key)?;
            let local_values = read_row(&tx, DISPUTES_TABLE, &status_columns, "id", &key)?;
            if let (Some(remote_values), Some(local_values)) = (remote_values, local_values) {
                let differing: Vec<(&str, Value)> = status_columns
                    .iter()
                    .zip(remote_values.into_iter().zip(local_values))
                    .filter(|(_, (remote_value, local_value))| remote_value != local_value)
                    .map(|(column, (remote_value, _))| (*column, remote_value))
                    .collect();

                if !differing.is_empty() {
                    let assignments = differing
                        .iter()
                        .map(|(column, _)| format!("\"{column}\" = ?"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut values: Vec<Value> =
                        differing.iter().map(|(_, value)| value.clone()).collect();
                    values.push(Value::Text(key.clone()));
                    tx.execute(
                        &format!("UPDATE \"{DISPUTES_TABLE}\" SET {assignments} WHERE \"id\" = ?"),
                        params_from_iter(values.iter()),
                    )?;
                    report.status_changed = differing
                        .into_iter()
                        .map(|(column, _)| column.to_string())
                        .collect();
                }
            }
        }
    } else {
        // Copy the whole row so the message foreign key holds.
        let mut all_columns: Vec<&str> = local_dispute_columns
            .iter()
            .filter(|column| remote_dispute_columns.contains(*column))
            .map(String::as_str)
            .collect();
        all_columns.sort_unstable();
        if let Some(values) = read_row(&remote, DISPUTES_TABLE, &all_columns, "id", &key)? {
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO \"{DISPUTES_TABLE}\" ({}) VALUES ({})",
                    column_list(&all_columns),
                    placeholders(all_columns.len())
                ),
                params_from_iter(values.iter()),
            )?;
            report.dispute_created = true;
        } else {
            tracing::info!("Dispute {id} exists in neither copy; nothing to merge");
            return Ok(report);
        }
    }

    let message_columns = shared_columns(
        MESSAGE_COLUMNS,
        &table_columns(&tx, MESSAGES_TABLE)?,
        &table_columns(&remote, MESSAGES_TABLE)?,
    );
    if message_columns.contains(&"id") && message_columns.contains(&"dispute_id") {
        let select = format!(
            "SELECT {} FROM \"{MESSAGES_TABLE}\" WHERE \"dispute_id\" = ? ORDER BY \"id\"",
            column_list(&message_columns)
        );
        let insert = format!(
            "INSERT OR IGNORE INTO \"{MESSAGES_TABLE}\" ({}) VALUES ({})",
            column_list(&message_columns),
            placeholders(message_columns.len())
        );

        let mut read = remote.prepare(&select)?;
        let rows = read
            .query_map([key.as_str()], |row| {
                (0..message_columns.len())
                    .map(|index| row.get::<_, Value>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut write = tx.prepare(&insert)?;
        for values in rows {
            report.inserted_messages += write.execute(params_from_iter(values.iter()))?;
        }
    } else {
        tracing::warn!(
            "Message tables share no key columns; skipping thread merge for dispute {id}"
        );
    }

    tx.commit()?;
    Ok(report)
}
