//! Coupon model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Discount shape of a coupon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// Percentage of the invoice total
    Percent,
    /// Flat amount off the invoice total
    Flat,
}

/// Coupon entity
///
/// The discount always applies to the summed order total, never per
/// line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    /// Coupon code, doubles as the storage key
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    /// Users the coupon is restricted to; empty means anyone
    #[serde(default)]
    pub user_ids: Vec<String>,
    pub is_active: bool,
    /// Unix millis; absent means no expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Coupon {
    /// Discount for a given invoice total, clamped to the total
    pub fn discount_for(&self, total: Decimal) -> Decimal {
        let raw = match self.kind {
            DiscountKind::Percent => total * self.value / Decimal::from(100),
            DiscountKind::Flat => self.value,
        };
        raw.min(total)
    }
}
