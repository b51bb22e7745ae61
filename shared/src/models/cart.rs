//! Cart models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One priced quantity of a product/variant inside a cart
///
/// Lines are replaced wholesale on every cart mutation; the engine never
/// merges a new line into an old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    /// Selling shop (denormalized from the product for grouping)
    pub shop_id: String,
    pub product_name: String,
    pub quantity: u32,
    /// Price snapshot at cart time; the order assembler re-reads the
    /// catalog price, this one is display-only
    pub unit_price: Decimal,
    /// Shipping weight per unit in grams (snapshot)
    pub weight_grams: u32,
}

/// Cart entity - at most one open cart per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub user_id: String,
    pub lines: Vec<CartLine>,
    /// Weight-tiered shipping surcharge per shop
    #[serde(default)]
    pub shop_shipping: HashMap<String, Decimal>,
    /// Sum of the per-shop surcharges
    pub additional_shipping_cost: Decimal,
    /// Set when the cart is converted into an order; a cart with an
    /// order reference is closed and can no longer be replaced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cart {
    pub fn is_open(&self) -> bool {
        self.order_id.is_none()
    }
}
