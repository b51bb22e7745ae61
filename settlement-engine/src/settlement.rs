//! Settlement splitter
//!
//! Partitions one customer invoice into per-shop and per-merchant
//! invoices in a single deterministic pass over the lines. Commission is
//! computed per line from the shop's rate and accumulated; shipping
//! surcharges are added after the line loop so commission never touches
//! them. The split is rejected wholesale if the partition does not
//! reconcile back to the customer total.

use crate::money::{amounts_match, commission_for};
use crate::traits::EngineError;
use rust_decimal::Decimal;
use shared::models::{CustomerInvoice, MerchantInvoice, Shop, ShopInvoice, ShopInvoiceLine};
use std::collections::HashMap;
use uuid::Uuid;

/// Result of splitting one customer invoice
#[derive(Debug)]
pub struct SettlementSplit {
    pub shop_invoices: Vec<ShopInvoice>,
    pub merchant_invoices: Vec<MerchantInvoice>,
}

/// Per-shop accumulation state during the line pass
struct ShopAggregate {
    shop_id: String,
    merchant_id: String,
    commission_percent: Decimal,
    lines: Vec<ShopInvoiceLine>,
    invoice_total: Decimal,
    commission: Decimal,
}

impl ShopAggregate {
    fn new(shop: &Shop) -> Self {
        Self {
            shop_id: shop.id.clone(),
            merchant_id: shop.merchant_id.clone(),
            commission_percent: shop.commission_percent,
            lines: Vec::new(),
            invoice_total: Decimal::ZERO,
            commission: Decimal::ZERO,
        }
    }

    fn add_line(&mut self, line: ShopInvoiceLine) {
        self.invoice_total += line.grand_total;
        self.commission += line.commission;
        self.lines.push(line);
    }
}

/// Split a customer invoice into shop and merchant invoices
///
/// `shop_shipping` carries the per-shop weight surcharge; shops absent
/// from the map get no surcharge. Aggregates are created lazily in
/// first-seen line order, so the output ordering is a function of the
/// input alone.
pub fn split_invoice(
    invoice: &CustomerInvoice,
    shops: &HashMap<String, Shop>,
    shop_shipping: &HashMap<String, Decimal>,
    created_at: i64,
) -> Result<SettlementSplit, EngineError> {
    let mut aggregates: Vec<ShopAggregate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in &invoice.lines {
        let idx = match index.get(&line.shop_id) {
            Some(&i) => i,
            None => {
                let shop = shops.get(&line.shop_id).ok_or_else(|| {
                    EngineError::not_found("shop", line.shop_id.clone())
                })?;
                index.insert(line.shop_id.clone(), aggregates.len());
                aggregates.push(ShopAggregate::new(shop));
                aggregates.len() - 1
            }
        };
        let aggregate = &mut aggregates[idx];
        let commission = commission_for(line.grand_total, aggregate.commission_percent);
        aggregate.add_line(ShopInvoiceLine {
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            vat: line.vat,
            grand_total: line.grand_total,
            commission,
            refunded_quantity: 0,
        });
    }

    // Surcharges join after the line loop; no commission on shipping
    let mut shop_invoices = Vec::with_capacity(aggregates.len());
    for mut aggregate in aggregates {
        let surcharge = shop_shipping
            .get(&aggregate.shop_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        aggregate.invoice_total += surcharge;
        shop_invoices.push(ShopInvoice {
            id: Uuid::new_v4().to_string(),
            customer_invoice_id: invoice.id.clone(),
            order_id: invoice.order_id.clone(),
            shop_id: aggregate.shop_id,
            merchant_id: aggregate.merchant_id,
            merchant_invoice_id: String::new(),
            payment_method: invoice.payment_method,
            payment_status: invoice.payment_status,
            lines: aggregate.lines,
            shipping_cost: Decimal::ZERO,
            additional_shipping_cost: surcharge,
            invoice_total: aggregate.invoice_total,
            commission: aggregate.commission,
            created_at,
        });
    }

    // Merchant invoices aggregate shop invoices, again first-seen order
    let mut merchant_order: Vec<String> = Vec::new();
    let mut by_merchant: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, si) in shop_invoices.iter().enumerate() {
        by_merchant
            .entry(si.merchant_id.clone())
            .or_insert_with(|| {
                merchant_order.push(si.merchant_id.clone());
                Vec::new()
            })
            .push(idx);
    }

    let mut merchant_invoices = Vec::with_capacity(merchant_order.len());
    for merchant_id in merchant_order {
        let indices = &by_merchant[&merchant_id];
        let merchant_invoice_id = Uuid::new_v4().to_string();
        let mut invoice_total = Decimal::ZERO;
        let mut commission = Decimal::ZERO;
        let mut shop_invoice_ids = Vec::with_capacity(indices.len());
        for &idx in indices {
            let si = &mut shop_invoices[idx];
            si.merchant_invoice_id = merchant_invoice_id.clone();
            invoice_total += si.invoice_total;
            commission += si.commission;
            shop_invoice_ids.push(si.id.clone());
        }
        merchant_invoices.push(MerchantInvoice {
            id: merchant_invoice_id,
            customer_invoice_id: invoice.id.clone(),
            order_id: invoice.order_id.clone(),
            merchant_id,
            shop_invoice_ids,
            payment_method: invoice.payment_method,
            payment_status: invoice.payment_status,
            invoice_total,
            commission,
            created_at,
        });
    }

    reconcile(invoice, &shop_invoices, &merchant_invoices)?;

    Ok(SettlementSplit {
        shop_invoices,
        merchant_invoices,
    })
}

/// Both partitions must sum back to the customer total within the money
/// tolerance. A mismatch aborts the whole order transaction.
fn reconcile(
    invoice: &CustomerInvoice,
    shop_invoices: &[ShopInvoice],
    merchant_invoices: &[MerchantInvoice],
) -> Result<(), EngineError> {
    let shop_sum: Decimal = shop_invoices.iter().map(|i| i.invoice_total).sum();
    if !amounts_match(shop_sum, invoice.invoice_total) {
        return Err(EngineError::InconsistentSettlement(format!(
            "shop invoices sum to {} but customer invoice total is {}",
            shop_sum, invoice.invoice_total
        )));
    }
    let merchant_sum: Decimal = merchant_invoices.iter().map(|i| i.invoice_total).sum();
    if !amounts_match(merchant_sum, invoice.invoice_total) {
        return Err(EngineError::InconsistentSettlement(format!(
            "merchant invoices sum to {} but customer invoice total is {}",
            merchant_sum, invoice.invoice_total
        )));
    }
    Ok(())
}
