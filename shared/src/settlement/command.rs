//! Settlement commands - requests to mutate the settlement state

use super::types::{
    CartLineInput, RefundAdjudicationInput, RefundLineInput, RefundTargetStatus,
};
use crate::models::{OrderStatus, PaymentMethod, ShipmentStatus, WithdrawalStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement command envelope
///
/// `command_id` is the idempotency key: the engine processes each id at
/// most once and answers retries with a duplicate response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementCommand {
    /// Client-generated unique command ID
    pub command_id: String,
    /// Operator who issued the command
    pub operator_id: String,
    /// Operator name (snapshot for audit)
    pub operator_name: String,
    /// Client timestamp (Unix milliseconds)
    pub timestamp: i64,
    pub payload: SettlementCommandPayload,
}

impl SettlementCommand {
    pub fn new(
        operator_id: impl Into<String>,
        operator_name: impl Into<String>,
        payload: SettlementCommandPayload,
    ) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            operator_id: operator_id.into(),
            operator_name: operator_name.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// Command payload variants, one per external operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementCommandPayload {
    /// Replace the user's open cart wholesale
    ReplaceCart {
        user_id: String,
        lines: Vec<CartLineInput>,
    },

    /// Convert a cart into an immutable order with its invoices
    CreateOrder {
        cart_id: String,
        shipping_address_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        billing_address_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        coupon_code: Option<String>,
        payment_method: PaymentMethod,
    },

    /// Advance an order's status; a payment-method change propagates to
    /// the child shop/merchant invoices
    UpdateOrderStatus {
        order_id: String,
        status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        payment_method: Option<PaymentMethod>,
    },

    /// Customer opens a refund request against delivered shop invoices
    CreateRefundRequest {
        order_id: String,
        lines: Vec<RefundLineInput>,
    },

    /// Admin picks, approves or force-rejects refund lines
    UpdateRefundStatus {
        request_id: String,
        lines: Vec<RefundAdjudicationInput>,
        target_status: RefundTargetStatus,
    },

    /// Assign a refund approval (or the raw request, legacy path) to a
    /// transporter
    AssignRefundShipment {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_id: Option<String>,
        transporter_id: String,
    },

    /// Advance a refund shipment; DELIVERED triggers the closure check
    UpdateShipmentStatus {
        assignment_id: String,
        status: ShipmentStatus,
    },

    /// Merchant requests a withdrawal against the available balance
    CreateWithdrawal {
        merchant_id: String,
        amount: Decimal,
        bank_account_id: String,
    },

    /// Admin adjudicates a pending withdrawal request
    UpdateWithdrawalStatus {
        request_id: String,
        status: WithdrawalStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        paid_amount: Option<Decimal>,
    },
}
