//! Money calculation utilities
//!
//! All monetary values are `rust_decimal::Decimal`; this module owns the
//! rounding strategy and the input bounds checks shared by the command
//! actions.

use crate::traits::EngineError;
use rust_decimal::{Decimal, RoundingStrategy};
use shared::settlement::CartLineInput;

/// Rounding strategy for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Tolerance for monetary comparisons (0.01)
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Maximum allowed unit price
const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Maximum allowed quantity per line
pub const MAX_QUANTITY: u32 = 9999;

/// Round to the money precision (2 dp, midpoint away from zero)
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// `|a - b| <= MONEY_TOLERANCE`
pub fn amounts_match(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= MONEY_TOLERANCE
}

/// Line subtotal: unit price x quantity
pub fn line_subtotal(unit_price: Decimal, quantity: u32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// VAT for a line subtotal at the given percent rate, rounded
pub fn vat_for(subtotal: Decimal, vat_percent: Decimal) -> Decimal {
    round_money(subtotal * vat_percent / Decimal::from(100))
}

/// Commission share of a grand total at the given percent rate, rounded
///
/// Decimal addition is exact, so summing per-line commissions is
/// independent of line ordering.
pub fn commission_for(grand_total: Decimal, commission_percent: Decimal) -> Decimal {
    round_money(grand_total * commission_percent / Decimal::from(100))
}

/// Validate a unit price read from the catalog
pub fn validate_price(price: Decimal, context: &str) -> Result<(), EngineError> {
    if price < Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "{} has a negative price ({})",
            context, price
        )));
    }
    if price > MAX_PRICE {
        return Err(EngineError::Validation(format!(
            "{} price exceeds maximum allowed ({})",
            context, MAX_PRICE
        )));
    }
    Ok(())
}

/// Validate a CartLineInput before processing
pub fn validate_cart_line(line: &CartLineInput) -> Result<(), EngineError> {
    if line.product_id.is_empty() {
        return Err(EngineError::Validation(
            "cart line is missing a product id".to_string(),
        ));
    }
    if line.quantity == 0 {
        return Err(EngineError::Validation(format!(
            "quantity must be positive for product {}",
            line.product_id
        )));
    }
    if line.quantity > MAX_QUANTITY {
        return Err(EngineError::Validation(format!(
            "quantity exceeds maximum allowed ({}) for product {}",
            MAX_QUANTITY, line.product_id
        )));
    }
    Ok(())
}

/// Validate a withdrawal amount before any balance computation
pub fn validate_amount(amount: Decimal, field_name: &str) -> Result<(), EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "{} must be positive, got {}",
            field_name, amount
        )));
    }
    Ok(())
}
