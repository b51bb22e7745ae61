//! Shared types for the settlement engine
//!
//! Domain models, commands, events, and response structures used by the
//! engine crate and by any front-end integration layer.

pub mod models;
pub mod settlement;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use settlement::{
    CommandError, CommandErrorCode, CommandResponse, EventPayload, SettlementCommand,
    SettlementCommandPayload, SettlementEvent, SettlementEventType,
};
