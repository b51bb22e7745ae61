//! Product and variant models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shared stock counters for a product or variant
///
/// `quantity` is sellable stock, `reserved` is claimed by open carts,
/// `sold` is fulfilled. Counters are only mutated through the engine's
/// inventory functions, which enforce `quantity >= 0`, `reserved >= 0`
/// and `reserved <= quantity` at every step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCounters {
    /// Sellable stock on hand
    pub quantity: u32,
    /// Claimed by open carts, not yet fulfilled
    #[serde(default)]
    pub reserved: u32,
    /// Fulfilled quantity (lifetime)
    #[serde(default)]
    pub sold: u32,
    /// Mutation counter, backs the compare-and-swap check at persist time
    #[serde(default)]
    pub version: u64,
}

impl StockCounters {
    pub fn new(quantity: u32) -> Self {
        Self {
            quantity,
            reserved: 0,
            sold: 0,
            version: 0,
        }
    }

    /// Stock still open for new reservations
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved)
    }
}

/// Product entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Selling shop reference (String ID, required)
    pub shop_id: String,
    /// Unit price, used when the product has no variants
    pub price: Decimal,
    /// VAT rate in percent (e.g. 19 = 19%)
    #[serde(default)]
    pub vat_percent: Decimal,
    /// Shipping weight per unit, in grams
    #[serde(default)]
    pub weight_grams: u32,
    /// Quantity at or below which a low-stock notification is emitted
    pub low_stock_threshold: u32,
    pub stock: StockCounters,
    pub has_variants: bool,
    pub is_active: bool,
}

/// Product variant entity
///
/// Carries its own price and stock counters; the parent product's
/// counters are not touched when a variant is sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: String,
    /// Parent product reference (String ID)
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub stock: StockCounters,
    pub is_active: bool,
}
