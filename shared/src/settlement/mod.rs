//! Settlement command pipeline types
//!
//! This module provides the types flowing through the settlement engine:
//! - Commands: requests from the (out-of-scope) API layer
//! - Events: immutable facts recorded after command processing and
//!   forwarded to the notification collaborators
//! - Responses: per-command success/error envelopes

pub mod command;
pub mod event;
pub mod types;

// Re-exports
pub use command::{SettlementCommand, SettlementCommandPayload};
pub use event::{EventPayload, SettlementEvent, SettlementEventType};
pub use types::*;
