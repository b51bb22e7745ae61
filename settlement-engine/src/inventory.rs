//! Inventory ledger operations
//!
//! Stock moves through three counters: `quantity` (on hand), `reserved`
//! (held by open carts) and `sold`. Reservation happens at cart
//! replacement, the sale is committed at order assembly, and releases
//! happen when a cart is replaced or an order is cancelled. Every
//! counter mutation bumps the version so the guarded put can detect a
//! concurrent writer.

use crate::traits::{CommandContext, EngineError};
use shared::models::{CartLine, StockCounters};
use shared::settlement::StockShortage;

/// Stock level notice produced when a sale is committed
#[derive(Debug, Clone)]
pub enum StockNotice {
    Low {
        product_id: String,
        variant_id: Option<String>,
        product_name: String,
        remaining: u32,
        threshold: u32,
    },
    Depleted {
        product_id: String,
        variant_id: Option<String>,
        product_name: String,
    },
}

fn counters_for(
    ctx: &mut CommandContext<'_>,
    line: &CartLine,
) -> Result<StockCounters, EngineError> {
    match &line.variant_id {
        Some(variant_id) => {
            let variant = ctx.load_variant(variant_id)?;
            if !variant.is_active {
                return Err(EngineError::Validation(format!(
                    "variant {} is not active",
                    variant_id
                )));
            }
            Ok(variant.stock)
        }
        None => {
            let product = ctx.load_product(&line.product_id)?;
            if !product.is_active {
                return Err(EngineError::Validation(format!(
                    "product {} is not active",
                    line.product_id
                )));
            }
            Ok(product.stock)
        }
    }
}

fn store_counters(
    ctx: &mut CommandContext<'_>,
    line: &CartLine,
    stock: StockCounters,
) -> Result<(), EngineError> {
    match &line.variant_id {
        Some(variant_id) => {
            let mut variant = ctx.load_variant(variant_id)?;
            variant.stock = stock;
            ctx.save_variant(variant);
        }
        None => {
            let mut product = ctx.load_product(&line.product_id)?;
            product.stock = stock;
            ctx.save_product(product);
        }
    }
    Ok(())
}

/// Reserve stock for every line, all-or-nothing
///
/// Reservations are staged as the lines are walked, so duplicate lines
/// for one product are checked against the cumulative total rather than
/// each seeing the untouched counters. Shortages are still collected
/// across the whole cart so the caller can report every offending line
/// at once; any shortage fails the command and the staged reservations
/// are discarded with the transaction.
pub fn reserve_lines(
    ctx: &mut CommandContext<'_>,
    lines: &[CartLine],
) -> Result<(), EngineError> {
    let mut shortages = Vec::new();
    for line in lines {
        let mut stock = counters_for(ctx, line)?;
        if line.quantity > stock.available() {
            shortages.push(StockShortage {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: line.product_name.clone(),
                requested: line.quantity,
                available: stock.available(),
            });
            continue;
        }
        stock.reserved += line.quantity;
        stock.version += 1;
        store_counters(ctx, line, stock)?;
    }
    if !shortages.is_empty() {
        return Err(EngineError::InsufficientStock(shortages));
    }
    Ok(())
}

/// Release previously reserved stock (cart replaced or order cancelled)
pub fn release_lines(
    ctx: &mut CommandContext<'_>,
    lines: &[CartLine],
) -> Result<(), EngineError> {
    for line in lines {
        let mut stock = counters_for(ctx, line)?;
        stock.reserved = stock.reserved.saturating_sub(line.quantity);
        stock.version += 1;
        store_counters(ctx, line, stock)?;
    }
    Ok(())
}

/// Commit the sale: reservation becomes a decrement of on-hand stock
///
/// Fails with `StockExceeded` if on-hand quantity no longer covers the
/// line, which means stock was adjusted after the reservation.
pub fn commit_sale_lines(
    ctx: &mut CommandContext<'_>,
    lines: &[CartLine],
) -> Result<Vec<StockNotice>, EngineError> {
    let mut notices = Vec::new();
    for line in lines {
        let mut stock = counters_for(ctx, line)?;
        if line.quantity > stock.quantity {
            return Err(EngineError::StockExceeded(format!(
                "product {}: quantity {} exceeds on-hand stock {}",
                line.product_id, line.quantity, stock.quantity
            )));
        }
        stock.reserved = stock.reserved.saturating_sub(line.quantity);
        stock.quantity -= line.quantity;
        stock.sold += line.quantity;
        stock.version += 1;
        let remaining = stock.quantity;
        store_counters(ctx, line, stock)?;

        // Threshold lives on the product even for variant sales
        let threshold = ctx.load_product(&line.product_id)?.low_stock_threshold;
        if remaining == 0 {
            notices.push(StockNotice::Depleted {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: line.product_name.clone(),
            });
        } else if remaining <= threshold {
            notices.push(StockNotice::Low {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: line.product_name.clone(),
                remaining,
                threshold,
            });
        }
    }
    Ok(notices)
}

/// Return sold stock to on-hand counters (approved refund lines)
pub fn restock(
    ctx: &mut CommandContext<'_>,
    product_id: &str,
    variant_id: Option<&str>,
    quantity: u32,
) -> Result<(), EngineError> {
    match variant_id {
        Some(vid) => {
            let mut variant = ctx.load_variant(vid)?;
            variant.stock.quantity += quantity;
            variant.stock.sold = variant.stock.sold.saturating_sub(quantity);
            variant.stock.version += 1;
            ctx.save_variant(variant);
        }
        None => {
            let mut product = ctx.load_product(product_id)?;
            product.stock.quantity += quantity;
            product.stock.sold = product.stock.sold.saturating_sub(quantity);
            product.stock.version += 1;
            ctx.save_product(product);
        }
    }
    Ok(())
}
