//! CreateRefundRequest command handler
//!
//! Opens a refund request against a delivered order. Each line is
//! matched to a shop-invoice line with enough un-refunded quantity; the
//! matched quantity is marked on the invoice line so a second request
//! cannot refund the same units twice.

use async_trait::async_trait;

use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{
    AssignStatus, OrderStatus, RefundLineState, RefundRequest, RefundRequestDetail,
};
use shared::settlement::{
    EventPayload, RefundLineInput, SettlementEvent, SettlementEventType,
};

/// CreateRefundRequest action
#[derive(Debug, Clone)]
pub struct CreateRefundRequestAction {
    pub order_id: String,
    pub lines: Vec<RefundLineInput>,
}

#[async_trait]
impl CommandHandler for CreateRefundRequestAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Validate input
        if self.lines.is_empty() {
            return Err(EngineError::Validation(
                "refund request has no lines".to_string(),
            ));
        }
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(EngineError::Validation(format!(
                    "quantity must be positive for product {}",
                    line.product_id
                )));
            }
        }

        // 2. Refunds only apply to delivered orders
        let order = ctx.load_order(&self.order_id)?;
        if order.status != OrderStatus::Delivered {
            return Err(EngineError::InvalidOperation(format!(
                "order {} is not delivered ({:?})",
                order.id, order.status
            )));
        }

        // 3. Match each line against its shop-invoice line and mark the
        //    refunded quantity
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut details = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let mut shop_invoice = ctx.load_shop_invoice(&line.shop_invoice_id)?;
            if shop_invoice.order_id != self.order_id {
                return Err(EngineError::Validation(format!(
                    "shop invoice {} does not belong to order {}",
                    shop_invoice.id, self.order_id
                )));
            }
            let invoice_line = shop_invoice
                .lines
                .iter_mut()
                .find(|l| l.product_id == line.product_id && l.variant_id == line.variant_id)
                .ok_or_else(|| {
                    EngineError::not_found("shop invoice line", line.product_id.clone())
                })?;
            if line.quantity > invoice_line.refundable_quantity() {
                return Err(EngineError::InvalidOperation(format!(
                    "product {}: requested {} exceeds refundable quantity {}",
                    line.product_id,
                    line.quantity,
                    invoice_line.refundable_quantity()
                )));
            }
            invoice_line.refunded_quantity += line.quantity;

            details.push(RefundRequestDetail {
                id: uuid::Uuid::new_v4().to_string(),
                shop_invoice_id: shop_invoice.id.clone(),
                shop_id: shop_invoice.shop_id.clone(),
                merchant_id: shop_invoice.merchant_id.clone(),
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                product_name: invoice_line.product_name.clone(),
                unit_price: invoice_line.unit_price,
                requested_quantity: line.quantity,
                reason: line.reason.clone(),
                state: RefundLineState::Requested,
            });
            ctx.save_shop_invoice(shop_invoice);
        }

        // 4. Stage the request
        let total_refundable_amount = details.iter().map(|d| d.refundable_amount()).sum();
        let line_count = details.len();
        let request = RefundRequest {
            id: request_id.clone(),
            order_id: self.order_id.clone(),
            customer_id: order.customer_id.clone(),
            details,
            total_refundable_amount,
            assign_status: AssignStatus::UnAssigned,
            fanout_done: false,
            created_at: metadata.timestamp,
            updated_at: metadata.timestamp,
        };
        ctx.save_refund_request(request);

        // 5. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::RefundRequested,
            EventPayload::RefundRequested {
                request_id,
                order_id: self.order_id.clone(),
                customer_id: order.customer_id,
                line_count,
                total_refundable_amount,
            },
        );

        Ok(vec![event])
    }
}
