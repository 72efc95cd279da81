//! Dispute repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{Dispute, DisputeId, DisputeMessage, DisputeStatus, MessageRole};
use rusqlite::{params, Connection, OptionalExtension};

const DISPUTE_COLUMNS: &str =
    "id, shift_ref, opened_by, status, decided_by, decided_at, closed_at, created_at";
const MESSAGE_COLUMNS: &str = "id, dispute_id, author, role, body, status_code, created_at";

/// Trait for dispute storage operations
pub trait DisputeRepository {
    /// Open a new dispute for a shift
    fn create(&self, shift_ref: &str, opened_by: &str) -> Result<Dispute>;

    /// Get a dispute by ID
    fn get(&self, id: &DisputeId) -> Result<Option<Dispute>>;

    /// List disputes, newest first
    fn list(&self, limit: usize) -> Result<Vec<Dispute>>;

    /// Append a message to a dispute thread, optionally setting a new status
    fn post_message(
        &self,
        id: &DisputeId,
        author: &str,
        role: MessageRole,
        body: &str,
        status_code: Option<DisputeStatus>,
    ) -> Result<DisputeMessage>;

    /// Record a decision on a dispute
    fn decide(&self, id: &DisputeId, status: DisputeStatus, decided_by: &str) -> Result<Dispute>;

    /// All messages of a dispute in key order
    fn messages(&self, id: &DisputeId) -> Result<Vec<DisputeMessage>>;
}

/// `SQLite` implementation of `DisputeRepository`
pub struct SqliteDisputeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDisputeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Next message key: microsecond clock, bumped past the current maximum.
    ///
    /// Two replicas writing the same thread get distinct keys unless they post
    /// within the same microsecond.
    fn next_message_id(&self) -> Result<i64> {
        let current: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM dispute_messages",
            [],
            |row| row.get(0),
        )?;
        let clock = chrono::Utc::now().timestamp_micros();
        Ok(clock.max(current + 1))
    }

    fn parse_dispute(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dispute> {
        let id: String = row.get(0)?;
        let status: String = row.get(3)?;
        Ok(Dispute {
            id: id.parse().unwrap_or_default(),
            shift_ref: row.get(1)?,
            opened_by: row.get(2)?,
            status: status.parse().unwrap_or_default(),
            decided_by: row.get(4)?,
            decided_at: row.get(5)?,
            closed_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn parse_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<DisputeMessage> {
        let dispute_id: String = row.get(1)?;
        let role: String = row.get(3)?;
        let status_code: Option<String> = row.get(5)?;
        Ok(DisputeMessage {
            id: row.get(0)?,
            dispute_id: dispute_id.parse().unwrap_or_default(),
            author: row.get(2)?,
            role: role.parse().unwrap_or_default(),
            body: row.get(4)?,
            status_code: status_code.and_then(|code| code.parse().ok()),
            created_at: row.get(6)?,
        })
    }

    fn require(&self, id: &DisputeId) -> Result<Dispute> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("dispute {id}")))
    }
}

impl DisputeRepository for SqliteDisputeRepository<'_> {
    fn create(&self, shift_ref: &str, opened_by: &str) -> Result<Dispute> {
        let shift_ref = shift_ref.trim();
        if shift_ref.is_empty() {
            return Err(Error::InvalidInput("Shift reference cannot be empty".into()));
        }

        let dispute = Dispute::new(shift_ref, opened_by.trim());
        self.conn.execute(
            "INSERT INTO disputes (id, shift_ref, opened_by, status, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                dispute.id.as_str(),
                dispute.shift_ref,
                dispute.opened_by,
                dispute.status.as_str(),
                dispute.created_at
            ],
        )?;

        Ok(dispute)
    }

    fn get(&self, id: &DisputeId) -> Result<Option<Dispute>> {
        let dispute = self
            .conn
            .query_row(
                &format!("SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = ?"),
                params![id.as_str()],
                Self::parse_dispute,
            )
            .optional()?;
        Ok(dispute)
    }

    fn list(&self, limit: usize) -> Result<Vec<Dispute>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes ORDER BY created_at DESC, id DESC LIMIT ?"
        ))?;
        let disputes = stmt
            .query_map(params![limit as i64], Self::parse_dispute)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(disputes)
    }

    fn post_message(
        &self,
        id: &DisputeId,
        author: &str,
        role: MessageRole,
        body: &str,
        status_code: Option<DisputeStatus>,
    ) -> Result<DisputeMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::InvalidInput("Message body cannot be empty".into()));
        }
        let tx = self.conn.unchecked_transaction()?;
        self.require(id)?;

        let message = DisputeMessage {
            id: self.next_message_id()?,
            dispute_id: *id,
            author: author.trim().to_string(),
            role,
            body: body.to_string(),
            status_code,
            created_at: chrono::Utc::now().timestamp(),
        };

        self.conn.execute(
            &format!("INSERT INTO dispute_messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                message.id,
                message.dispute_id.as_str(),
                message.author,
                message.role.as_str(),
                message.body,
                message.status_code.map(DisputeStatus::as_str),
                message.created_at
            ],
        )?;

        if let Some(status) = status_code {
            self.decide(id, status, author)?;
        }

        tx.commit()?;
        Ok(message)
    }

    fn decide(&self, id: &DisputeId, status: DisputeStatus, decided_by: &str) -> Result<Dispute> {
        let now = chrono::Utc::now().timestamp();
        let closed_at = status.is_terminal().then_some(now);

        let updated = self.conn.execute(
            "UPDATE disputes SET status = ?, decided_by = ?, decided_at = ?, closed_at = ? WHERE id = ?",
            params![status.as_str(), decided_by.trim(), now, closed_at, id.as_str()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("dispute {id}")));
        }

        self.require(id)
    }

    fn messages(&self, id: &DisputeId) -> Result<Vec<DisputeMessage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM dispute_messages WHERE dispute_id = ? ORDER BY id"
        ))?;
        let messages = stmt
            .query_map(params![id.as_str()], Self::parse_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}
