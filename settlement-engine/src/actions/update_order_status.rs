//! UpdateOrderStatus command handler
//!
//! Advances an order along its lifecycle. Cancellation restocks the
//! committed quantities; a payment-method change propagates to the
//! customer, shop and merchant invoices in the same transaction.

use async_trait::async_trait;

use crate::inventory;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{OrderStatus, PaymentMethod};
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};

/// UpdateOrderStatus action
#[derive(Debug, Clone)]
pub struct UpdateOrderStatusAction {
    pub order_id: String,
    pub status: OrderStatus,
    pub payment_method: Option<PaymentMethod>,
}

#[async_trait]
impl CommandHandler for UpdateOrderStatusAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Load and validate the transition
        let mut order = ctx.load_order(&self.order_id)?;
        let from = order.status;
        if !from.can_transition_to(self.status) {
            return Err(EngineError::InvalidTransition(format!(
                "order {}: {:?} -> {:?}",
                order.id, from, self.status
            )));
        }

        // 2. Cancellation returns committed stock to the shelf
        if self.status == OrderStatus::Cancelled {
            for line in &order.lines {
                inventory::restock(
                    ctx,
                    &line.product_id,
                    line.variant_id.as_deref(),
                    line.quantity,
                )?;
            }
        }

        // 3. Payment-method change propagates to all invoice levels
        if let Some(method) = self.payment_method {
            order.payment_method = method;
            let mut invoice = ctx.load_customer_invoice(&order.invoice_id)?;
            invoice.payment_method = method;
            ctx.save_customer_invoice(invoice);
            for mut shop_invoice in ctx.shop_invoices_for_order(&order.id)? {
                shop_invoice.payment_method = method;
                let merchant_invoice_id = shop_invoice.merchant_invoice_id.clone();
                ctx.save_shop_invoice(shop_invoice);
                let mut merchant_invoice = ctx.load_merchant_invoice(&merchant_invoice_id)?;
                merchant_invoice.payment_method = method;
                ctx.save_merchant_invoice(merchant_invoice);
            }
        }

        // 4. Stage the order
        order.status = self.status;
        order.updated_at = metadata.timestamp;
        let order_id = order.id.clone();
        ctx.save_order(order);

        // 5. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            order_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::OrderStatusChanged,
            EventPayload::OrderStatusChanged {
                order_id,
                from,
                to: self.status,
            },
        );

        Ok(vec![event])
    }
}
