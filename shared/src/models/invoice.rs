//! Invoice models
//!
//! One `CustomerInvoice` per order, partitioned by the settlement
//! splitter into per-shop and per-merchant invoices that must reconcile
//! to the same totals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment method recorded on the order and propagated to all three
/// invoice levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Wallet,
}

/// Payment settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

/// One priced quantity of a product/variant within the customer invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub shop_id: String,
    pub merchant_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Per-line discount (currently only ever zero; coupon discounts
    /// apply to the invoice total, never per line)
    pub discount: Decimal,
    pub vat: Decimal,
    /// price x quantity + vat - discount
    pub grand_total: Decimal,
}

/// Customer invoice - one per order, created in the order transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInvoice {
    pub id: String,
    pub invoice_number: String,
    pub order_id: String,
    pub customer_id: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub lines: Vec<InvoiceLine>,
    /// Sum of the per-shop weight-tiered surcharges
    pub additional_shipping_cost: Decimal,
    /// Sum of line grand totals plus `additional_shipping_cost`.
    /// This is the figure the shop invoices must reconcile against.
    pub invoice_total: Decimal,
    /// Coupon discount, applied to the total after all lines are summed
    #[serde(default)]
    pub coupon_discount: Decimal,
    /// invoice_total - coupon_discount; what the customer actually pays
    pub payable_total: Decimal,
    pub created_at: i64,
}

/// Shop invoice line - customer invoice line plus its commission share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopInvoiceLine {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub vat: Decimal,
    pub grand_total: Decimal,
    /// grand_total x shop commission percent / 100, fixed at settlement
    pub commission: Decimal,
    /// Quantity already covered by refund requests; gates refund creation
    #[serde(default)]
    pub refunded_quantity: u32,
}

impl ShopInvoiceLine {
    /// Quantity still open for refund requests
    pub fn refundable_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.refunded_quantity)
    }
}

/// Shop invoice - read-only partition of a customer invoice for one shop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopInvoice {
    pub id: String,
    pub customer_invoice_id: String,
    pub order_id: String,
    pub shop_id: String,
    pub merchant_id: String,
    /// Parent merchant invoice aggregating this shop invoice
    pub merchant_invoice_id: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub lines: Vec<ShopInvoiceLine>,
    /// Flat shipping cost charged by the shop (no commission)
    #[serde(default)]
    pub shipping_cost: Decimal,
    /// Weight-tiered surcharge for this shop (no commission)
    pub additional_shipping_cost: Decimal,
    /// Accumulated from line grand totals plus shipping; never recomputed
    pub invoice_total: Decimal,
    /// Accumulated from line commissions; never recomputed
    pub commission: Decimal,
    pub created_at: i64,
}

/// Merchant invoice - aggregation of one merchant's shop invoices for
/// one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantInvoice {
    pub id: String,
    pub customer_invoice_id: String,
    pub order_id: String,
    pub merchant_id: String,
    pub shop_invoice_ids: Vec<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Accumulated from constituent shop invoices; never recomputed
    pub invoice_total: Decimal,
    pub commission: Decimal,
    pub created_at: i64,
}
