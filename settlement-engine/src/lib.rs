//! Marketplace Settlement Engine
//!
//! Implements the order settlement pipeline for a multi-shop
//! marketplace:
//!
//! - **manager**: Core SettlementManager for command processing and event generation
//! - **storage**: redb-based persistence layer for entities, events, and indices
//! - **actions**: One command handler per external operation
//! - **settlement**: Customer invoice splitting into shop and merchant invoices
//! - **inventory**: Stock reservation, sale commit, release and restock
//! - **refunds**: Refund adjudication and approval bucket fan-out
//! - **balance**: Merchant balance derivation for the withdrawal engine
//!
//! # Data Flow
//!
//! 1. Client sends a SettlementCommand
//! 2. SettlementManager checks idempotency and dispatches the action
//! 3. The action stages entity writes and produces SettlementEvents
//! 4. Staged writes and events are persisted in one redb transaction
//! 5. Events are broadcast to subscribers after commit
//! 6. The CommandResponse is returned to the client

pub mod actions;
pub mod balance;
pub mod config;
pub mod inventory;
pub mod manager;
pub mod money;
pub mod notify;
pub mod refunds;
pub mod settlement;
pub mod shipping;
pub mod storage;
pub mod traits;

// Re-exports
pub use config::{CouponMatch, EngineConfig};
pub use manager::{ManagerError, ManagerResult, SettlementManager};
pub use notify::{NotificationGateway, NotificationWorker, SearchIndexer};
pub use storage::SettlementStorage;
pub use traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};

// Re-export shared types for convenience
pub use shared::settlement::{
    CommandError, CommandErrorCode, CommandResponse, EventPayload, SettlementCommand,
    SettlementCommandPayload, SettlementEvent, SettlementEventType,
};
