//! Shift dispute model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a dispute, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisputeId(Uuid);

impl DisputeId {
    /// Create a new unique dispute ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for DisputeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DisputeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DisputeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// Waiting for a manager decision
    #[default]
    Pending,
    /// Correction accepted
    Approved,
    /// Correction refused
    Rejected,
    /// Closed after discussion
    Resolved,
}

impl DisputeStatus {
    /// Stored column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Whether no further decision is expected
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "RESOLVED" => Ok(Self::Resolved),
            other => Err(Error::InvalidInput(format!(
                "Unknown dispute status: {other}"
            ))),
        }
    }
}

/// Who wrote a message in a dispute thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The employee who raised the dispute
    #[default]
    Employee,
    /// A manager reviewing it
    Manager,
}

impl MessageRole {
    /// Stored column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
        }
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Self::Employee),
            "manager" => Ok(Self::Manager),
            other => Err(Error::InvalidInput(format!("Unknown message role: {other}"))),
        }
    }
}

/// A disputed shift and its current decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique identifier
    pub id: DisputeId,
    /// Shift the dispute refers to
    pub shift_ref: String,
    /// Who opened it
    pub opened_by: String,
    /// Current status
    pub status: DisputeStatus,
    /// Who made the last decision
    pub decided_by: Option<String>,
    /// When the last decision was made (Unix seconds)
    pub decided_at: Option<i64>,
    /// When the dispute reached a terminal status (Unix seconds)
    pub closed_at: Option<i64>,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

impl Dispute {
    /// Open a new pending dispute for a shift
    #[must_use]
    pub fn new(shift_ref: impl Into<String>, opened_by: impl Into<String>) -> Self {
        Self {
            id: DisputeId::new(),
            shift_ref: shift_ref.into(),
            opened_by: opened_by.into(),
            status: DisputeStatus::Pending,
            decided_by: None,
            decided_at: None,
            closed_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One immutable entry in a dispute thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeMessage {
    /// Globally unique, monotonically assigned key
    pub id: i64,
    /// Owning dispute
    pub dispute_id: DisputeId,
    /// Display name of the author
    pub author: String,
    /// Author role
    pub role: MessageRole,
    /// Free text
    pub body: String,
    /// Status the author set together with this message, if any
    pub status_code: Option<DisputeStatus>,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispute_id_roundtrips_through_string() {
        let id = DisputeId::new();
        let parsed: DisputeId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "resolved".parse::<DisputeStatus>().unwrap(),
            DisputeStatus::Resolved
        );
        assert!("closed".parse::<DisputeStatus>().is_err());
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!DisputeStatus::Pending.is_terminal());
        assert!(DisputeStatus::Approved.is_terminal());
        assert!(DisputeStatus::Resolved.is_terminal());
    }

    #[test]
    fn new_dispute_starts_pending() {
        let dispute = Dispute::new("shift-2024-03-01", "ana");
        assert_eq!(dispute.status, DisputeStatus::Pending);
        assert!(dispute.decided_by.is_none());
    }
}
