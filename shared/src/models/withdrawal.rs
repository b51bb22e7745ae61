//! Merchant withdrawal models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Withdrawal request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

/// Merchant withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantWithdrawalRequest {
    pub id: String,
    pub merchant_id: String,
    /// Requested amount, validated against the available balance
    pub amount: Decimal,
    /// Amount actually paid out; set when the request is approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    pub bank_account_id: String,
    pub status: WithdrawalStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Point-in-time view of a merchant's withdrawable balance
///
/// Always computed fresh from settled shop invoices, closed refunds and
/// prior withdrawal requests; never persisted as a running total. Note
/// that `total_sale` counts every shop invoice regardless of delivery
/// status, which overstates the balance before delivery (kept as-is,
/// pending product clarification).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub merchant_id: String,
    pub total_sale: Decimal,
    pub total_withdrawal: Decimal,
    pub total_pending_withdrawal: Decimal,
    pub total_refund: Decimal,
    /// total_sale - (total_withdrawal + total_pending_withdrawal + total_refund)
    pub available: Decimal,
    pub computed_at: i64,
}
