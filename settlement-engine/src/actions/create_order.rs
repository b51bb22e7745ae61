//! CreateOrder command handler
//!
//! Converts an open cart into an immutable order: prices are re-locked
//! from the catalog, reserved stock is committed to sold, the customer
//! invoice is built and split into shop/merchant invoices, and the cart
//! is closed. Everything happens in one write transaction; a failure at
//! any step leaves no partial order behind.

use async_trait::async_trait;

use crate::config::CouponMatch;
use crate::inventory::{self, StockNotice};
use crate::money::{line_subtotal, validate_price, vat_for};
use crate::settlement::split_invoice;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use rust_decimal::Decimal;
use shared::models::{
    Cart, Coupon, CustomerInvoice, InvoiceLine, Order, OrderLine, OrderStatus, PaymentMethod,
    PaymentStatus, Shop,
};
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};
use std::collections::HashMap;

/// CreateOrder action
///
/// `order_number` and `invoice_number` are pre-generated by the manager
/// outside the write transaction (the counter lives in its own
/// transaction and redb does not nest writes).
#[derive(Debug, Clone)]
pub struct CreateOrderAction {
    pub cart_id: String,
    pub shipping_address_id: String,
    pub billing_address_id: Option<String>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub order_number: String,
    pub invoice_number: String,
    pub coupon_match: CouponMatch,
}

impl CreateOrderAction {
    fn check_coupon(
        &self,
        coupon: &Coupon,
        cart: &Cart,
        now: i64,
    ) -> Result<(), EngineError> {
        if !coupon.is_active {
            return Err(EngineError::Validation(format!(
                "coupon {} is not active",
                coupon.code
            )));
        }
        if let Some(expires_at) = coupon.expires_at {
            if now > expires_at {
                return Err(EngineError::Validation(format!(
                    "coupon {} has expired",
                    coupon.code
                )));
            }
        }
        if !coupon.user_ids.is_empty() {
            let key = match self.coupon_match {
                CouponMatch::UserId => &cart.user_id,
                CouponMatch::CartId => &cart.id,
            };
            if !coupon.user_ids.contains(key) {
                return Err(EngineError::Validation(format!(
                    "coupon {} is not available to this customer",
                    coupon.code
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for CreateOrderAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Load the cart; it must still be open and non-empty
        let mut cart = ctx.load_cart(&self.cart_id)?;
        if !cart.is_open() {
            return Err(EngineError::InvalidOperation(format!(
                "cart {} is already attached to an order",
                cart.id
            )));
        }
        if cart.lines.is_empty() {
            return Err(EngineError::Validation("cart has no lines".to_string()));
        }

        // 2. Resolve addresses; billing defaults to shipping
        let shipping_address = ctx.load_address(&self.shipping_address_id)?;
        let billing_address = match &self.billing_address_id {
            Some(id) => ctx.load_address(id)?,
            None => shipping_address.clone(),
        };

        // 3. Coupon eligibility, before any write
        let coupon = match &self.coupon_code {
            Some(code) => {
                let coupon = ctx.load_coupon(code)?;
                self.check_coupon(&coupon, &cart, metadata.timestamp)?;
                Some(coupon)
            }
            None => None,
        };

        // 4. Build order and invoice lines with prices re-locked from
        //    the catalog, not from the cart snapshot
        let order_id = uuid::Uuid::new_v4().to_string();
        let invoice_id = uuid::Uuid::new_v4().to_string();
        let mut shops: HashMap<String, Shop> = HashMap::new();
        let mut order_lines = Vec::with_capacity(cart.lines.len());
        let mut invoice_lines = Vec::with_capacity(cart.lines.len());
        let mut lines_total = Decimal::ZERO;

        for line in &cart.lines {
            let product = ctx.load_product(&line.product_id)?;
            let unit_price = match &line.variant_id {
                Some(variant_id) => ctx.load_variant(variant_id)?.price,
                None => product.price,
            };
            validate_price(unit_price, &line.product_name)?;

            if !shops.contains_key(&product.shop_id) {
                let shop = ctx.load_shop(&product.shop_id)?;
                shops.insert(shop.id.clone(), shop);
            }
            let merchant_id = shops[&product.shop_id].merchant_id.clone();

            let subtotal = line_subtotal(unit_price, line.quantity);
            let vat = vat_for(subtotal, product.vat_percent);
            let grand_total = subtotal + vat;
            lines_total += grand_total;

            order_lines.push(OrderLine {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: line.product_name.clone(),
                shop_id: product.shop_id.clone(),
                merchant_id: merchant_id.clone(),
                quantity: line.quantity,
                unit_price,
                vat_percent: product.vat_percent,
            });
            invoice_lines.push(InvoiceLine {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: line.product_name.clone(),
                shop_id: product.shop_id.clone(),
                merchant_id,
                quantity: line.quantity,
                unit_price,
                discount: Decimal::ZERO,
                vat,
                grand_total,
            });
        }

        // 5. Commit the sale; stock may have moved since the cart was
        //    reserved, which surfaces as StockExceeded
        let notices = inventory::commit_sale_lines(ctx, &cart.lines)?;

        // 6. Customer invoice; the coupon discounts the summed total,
        //    never individual lines
        let invoice_total = lines_total + cart.additional_shipping_cost;
        let coupon_discount = coupon
            .map(|c| c.discount_for(invoice_total))
            .unwrap_or(Decimal::ZERO);
        let invoice = CustomerInvoice {
            id: invoice_id.clone(),
            invoice_number: self.invoice_number.clone(),
            order_id: order_id.clone(),
            customer_id: cart.user_id.clone(),
            payment_method: self.payment_method,
            payment_status: PaymentStatus::Unpaid,
            lines: invoice_lines,
            additional_shipping_cost: cart.additional_shipping_cost,
            invoice_total,
            coupon_discount,
            payable_total: invoice_total - coupon_discount,
            created_at: metadata.timestamp,
        };

        // 7. Settlement split; reconciliation failure aborts everything
        let split = split_invoice(&invoice, &shops, &cart.shop_shipping, metadata.timestamp)?;
        let shop_count = split.shop_invoices.len();

        // 8. Stage all writes: order, invoices, closed cart
        let order = Order {
            id: order_id.clone(),
            order_number: self.order_number.clone(),
            cart_id: cart.id.clone(),
            customer_id: cart.user_id.clone(),
            shipping_address,
            billing_address,
            coupon_code: self.coupon_code.clone(),
            status: OrderStatus::Pending,
            payment_method: self.payment_method,
            invoice_id: invoice_id.clone(),
            lines: order_lines,
            created_at: metadata.timestamp,
            updated_at: metadata.timestamp,
        };
        let customer_id = cart.user_id.clone();
        cart.order_id = Some(order_id.clone());
        cart.updated_at = metadata.timestamp;
        ctx.save_cart(cart);
        ctx.save_order(order);
        let payable_total = invoice.payable_total;
        ctx.save_customer_invoice(invoice);
        for shop_invoice in split.shop_invoices {
            ctx.save_shop_invoice(shop_invoice);
        }
        for merchant_invoice in split.merchant_invoices {
            ctx.save_merchant_invoice(merchant_invoice);
        }

        // 9. Events: order creation plus any stock notices
        let seq = ctx.next_sequence();
        let mut events = vec![SettlementEvent::new(
            seq,
            order_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::OrderCreated,
            EventPayload::OrderCreated {
                order_id: order_id.clone(),
                order_number: self.order_number.clone(),
                customer_id,
                invoice_id,
                invoice_total,
                payable_total,
                shop_count,
            },
        )];
        for notice in notices {
            let seq = ctx.next_sequence();
            let (event_type, payload) = match notice {
                StockNotice::Low {
                    product_id,
                    variant_id,
                    product_name,
                    remaining,
                    threshold,
                } => (
                    SettlementEventType::LowStock,
                    EventPayload::LowStock {
                        product_id,
                        variant_id,
                        product_name,
                        remaining,
                        threshold,
                    },
                ),
                StockNotice::Depleted {
                    product_id,
                    variant_id,
                    product_name,
                } => (
                    SettlementEventType::StockDepleted,
                    EventPayload::StockDepleted {
                        product_id,
                        variant_id,
                        product_name,
                    },
                ),
            };
            events.push(SettlementEvent::new(
                seq,
                order_id.clone(),
                metadata.operator_id.clone(),
                metadata.operator_name.clone(),
                metadata.command_id.clone(),
                metadata.timestamp,
                event_type,
                payload,
            ));
        }

        Ok(events)
    }
}
