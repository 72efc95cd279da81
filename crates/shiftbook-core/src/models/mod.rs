//! Data models for Shiftbook

mod dispute;

pub use dispute::{Dispute, DisputeId, DisputeMessage, DisputeStatus, MessageRole};
