//! Weight-tiered shipping rate table

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One tier: everything up to `max_weight_grams` ships for `price`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTier {
    pub max_weight_grams: u32,
    pub price: Decimal,
}

/// Ordered list of weight tiers; the first tier whose upper bound covers
/// the weight wins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingRateTable {
    pub tiers: Vec<RateTier>,
}

impl ShippingRateTable {
    pub fn new(tiers: Vec<RateTier>) -> Self {
        Self { tiers }
    }

    /// Surcharge for a shipment of the given total weight
    ///
    /// Weight above the last tier falls back to the last tier's price
    /// (the table is open-ended at the top); an empty table charges
    /// nothing.
    pub fn price_for_weight(&self, weight_grams: u32) -> Decimal {
        for tier in &self.tiers {
            if weight_grams <= tier.max_weight_grams {
                return tier.price;
            }
        }
        self.tiers
            .last()
            .map(|t| t.price)
            .unwrap_or(Decimal::ZERO)
    }
}
