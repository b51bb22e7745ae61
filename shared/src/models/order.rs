//! Order models

use super::address::Address;
use super::invoice::PaymentMethod;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether `next` is a legal successor of `self`
    ///
    /// Delivered and Cancelled are terminal; the forward path is
    /// Pending -> Processing -> Shipped -> Delivered, with Cancelled
    /// reachable from any non-terminal state.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
                | (Shipped, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Price/quantity snapshot of one cart line at order time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub shop_id: String,
    pub merchant_id: String,
    pub quantity: u32,
    /// Unit price locked from the catalog at the instant of order
    /// creation, not from the cart
    pub unit_price: Decimal,
    pub vat_percent: Decimal,
}

/// Order entity - immutable once created
///
/// Only `status` and `payment_method` change after creation; lines and
/// addresses are snapshots and never mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Human-facing order number (server-generated, crash-safe counter)
    pub order_number: String,
    /// Originating cart reference
    pub cart_id: String,
    pub customer_id: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Customer invoice created in the same transaction
    pub invoice_id: String,
    pub lines: Vec<OrderLine>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    /// Total quantity across all lines
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Sum of line subtotals (price x quantity), before vat and shipping
    pub fn goods_subtotal(&self) -> Decimal {
        self.lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum()
    }
}
