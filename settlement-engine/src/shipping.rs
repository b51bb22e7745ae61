//! Shipping surcharge computation
//!
//! Each shop in a cart gets a weight-based surcharge looked up in the
//! configured rate table. The surcharge is billed to the customer on
//! top of line totals and is passed through to shops untouched; no
//! commission is taken on it.

use rust_decimal::Decimal;
use shared::models::{CartLine, ShippingRateTable};
use std::collections::HashMap;

/// Total parcel weight per shop, in grams
pub fn weight_by_shop(lines: &[CartLine]) -> HashMap<String, u32> {
    let mut weights: HashMap<String, u32> = HashMap::new();
    for line in lines {
        let line_weight = line.weight_grams.saturating_mul(line.quantity);
        let entry = weights.entry(line.shop_id.clone()).or_insert(0);
        *entry = entry.saturating_add(line_weight);
    }
    weights
}

/// Per-shop shipping surcharges and their sum
pub fn shipping_by_shop(
    lines: &[CartLine],
    rate_table: &ShippingRateTable,
) -> (HashMap<String, Decimal>, Decimal) {
    let mut per_shop = HashMap::new();
    let mut total = Decimal::ZERO;
    for (shop_id, weight) in weight_by_shop(lines) {
        let price = rate_table.price_for_weight(weight);
        total += price;
        per_shop.insert(shop_id, price);
    }
    (per_shop, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::RateTier;

    fn line(shop: &str, weight: u32, qty: u32) -> CartLine {
        CartLine {
            product_id: format!("p-{}", shop),
            variant_id: None,
            shop_id: shop.to_string(),
            product_name: "item".to_string(),
            quantity: qty,
            unit_price: Decimal::from(10),
            weight_grams: weight,
        }
    }

    fn table() -> ShippingRateTable {
        ShippingRateTable {
            tiers: vec![
                RateTier {
                    max_weight_grams: 1000,
                    price: Decimal::from(5),
                },
                RateTier {
                    max_weight_grams: 5000,
                    price: Decimal::from(12),
                },
            ],
        }
    }

    #[test]
    fn weights_accumulate_per_shop() {
        let lines = vec![line("s1", 200, 2), line("s1", 100, 1), line("s2", 3000, 1)];
        let weights = weight_by_shop(&lines);
        assert_eq!(weights["s1"], 500);
        assert_eq!(weights["s2"], 3000);
    }

    #[test]
    fn surcharge_uses_tier_of_total_weight() {
        let lines = vec![line("s1", 200, 2), line("s2", 3000, 1)];
        let (per_shop, total) = shipping_by_shop(&lines, &table());
        assert_eq!(per_shop["s1"], Decimal::from(5));
        assert_eq!(per_shop["s2"], Decimal::from(12));
        assert_eq!(total, Decimal::from(17));
    }

    #[test]
    fn empty_table_means_no_surcharge() {
        let lines = vec![line("s1", 200, 2)];
        let (per_shop, total) = shipping_by_shop(&lines, &ShippingRateTable::default());
        assert_eq!(per_shop["s1"], Decimal::ZERO);
        assert_eq!(total, Decimal::ZERO);
    }
}
