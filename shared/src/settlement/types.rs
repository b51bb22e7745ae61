//! Input payloads, responses and error codes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One requested cart line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLineInput {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: u32,
}

/// One line of a refund request, addressed by shop-invoice line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundLineInput {
    pub shop_invoice_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub reason: String,
}

/// Per-line admin input for a refund status update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAdjudicationInput {
    pub detail_id: String,
    /// Quantity physically picked up (target status PICKED)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_quantity: Option<u32>,
    /// Quantity approved for refund (target status APPROVED); the
    /// picked-approved delta is routed to the rejection bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_quantity: Option<u32>,
}

/// Target of an updateRefundStatus call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundTargetStatus {
    Picked,
    Approved,
    /// Admin override: force-rejects every line from any non-terminal state
    Rejected,
}

/// One offending line of an InsufficientStock rejection
///
/// The whole set is reported at once so the caller can display every
/// problem, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub requested: u32,
    pub available: u32,
}

impl std::fmt::Display for StockShortage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (requested {}, available {})",
            self.product_name, self.requested, self.available
        )
    }
}

/// Command response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// The command ID this responds to
    pub command_id: String,
    /// Whether the command succeeded
    pub success: bool,
    /// Primary entity created or mutated by the command (cart id, order
    /// id, request id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Error details if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResponse {
    pub fn success(command_id: String, entity_id: Option<String>) -> Self {
        Self {
            command_id,
            success: true,
            entity_id,
            error: None,
        }
    }

    pub fn error(command_id: String, error: CommandError) -> Self {
        Self {
            command_id,
            success: false,
            entity_id: None,
            error: Some(error),
        }
    }

    pub fn duplicate(command_id: String) -> Self {
        Self {
            command_id,
            success: true,
            entity_id: None,
            error: None,
        }
    }
}

/// Command error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandError {
    pub code: CommandErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: CommandErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Command error codes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandErrorCode {
    ValidationFailed,
    NotFound,
    InsufficientStock,
    StockExceeded,
    InsufficientBalance,
    InconsistentSettlement,
    ConcurrencyConflict,
    InvalidTransition,
    InvalidOperation,
    DuplicateCommand,
    InternalError,
    // Storage errors
    StorageFull,
    OutOfMemory,
    StorageCorrupted,
    SystemBusy,
}

/// Minimum amount a merchant may withdraw, in currency units
pub const MINIMUM_WITHDRAWAL: Decimal = Decimal::from_parts(500, 0, 0, false, 0);
