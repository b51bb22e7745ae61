//! UpdateRefundStatus command handler
//!
//! Drives the per-line refund state machine. Picking records physically
//! collected quantities, approval adjudicates them and triggers the
//! bucket fan-out exactly once per request, and the admin override
//! force-rejects everything.

use async_trait::async_trait;

use crate::inventory;
use crate::refunds::{all_lines_adjudicated, fan_out_approvals};
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{AssignStatus, RefundLineState};
use shared::settlement::{
    EventPayload, RefundAdjudicationInput, RefundTargetStatus, SettlementEvent,
    SettlementEventType,
};

/// UpdateRefundStatus action
#[derive(Debug, Clone)]
pub struct UpdateRefundStatusAction {
    pub request_id: String,
    pub lines: Vec<RefundAdjudicationInput>,
    pub target_status: RefundTargetStatus,
}

#[async_trait]
impl CommandHandler for UpdateRefundStatusAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Load the request; terminal requests are immutable
        let mut request = ctx.load_refund_request(&self.request_id)?;
        if request.assign_status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "refund request {} is already {:?}",
                request.id, request.assign_status
            )));
        }

        let mut events = Vec::new();

        // 2. Apply per-line transitions
        match self.target_status {
            RefundTargetStatus::Picked => {
                for input in &self.lines {
                    let detail = request
                        .details
                        .iter_mut()
                        .find(|d| d.id == input.detail_id)
                        .ok_or_else(|| {
                            EngineError::not_found("refund detail", input.detail_id.clone())
                        })?;
                    let picked = input.picked_quantity.ok_or_else(|| {
                        EngineError::Validation(format!(
                            "picked_quantity is required for detail {}",
                            input.detail_id
                        ))
                    })?;
                    detail.state = detail.state.pick(picked, detail.requested_quantity)?;
                }
            }
            RefundTargetStatus::Approved => {
                for input in &self.lines {
                    let detail = request
                        .details
                        .iter_mut()
                        .find(|d| d.id == input.detail_id)
                        .ok_or_else(|| {
                            EngineError::not_found("refund detail", input.detail_id.clone())
                        })?;
                    let approved = input.approved_quantity.ok_or_else(|| {
                        EngineError::Validation(format!(
                            "approved_quantity is required for detail {}",
                            input.detail_id
                        ))
                    })?;
                    detail.state = detail.state.adjudicate(approved)?;
                }

                // 3. Fan-out runs once, after the whole request is
                //    adjudicated; a retry must not duplicate buckets
                if all_lines_adjudicated(&request) && !request.fanout_done {
                    // Approved units go back on the shelf
                    for detail in &request.details {
                        let approved = detail.state.approved_quantity();
                        if approved > 0 {
                            inventory::restock(
                                ctx,
                                &detail.product_id,
                                detail.variant_id.as_deref(),
                                approved,
                            )?;
                        }
                    }
                    for approval in fan_out_approvals(&request, metadata.timestamp) {
                        let seq = ctx.next_sequence();
                        events.push(SettlementEvent::new(
                            seq,
                            request.id.clone(),
                            metadata.operator_id.clone(),
                            metadata.operator_name.clone(),
                            metadata.command_id.clone(),
                            metadata.timestamp,
                            SettlementEventType::RefundApprovalIssued,
                            EventPayload::RefundApprovalIssued {
                                request_id: request.id.clone(),
                                approval_id: approval.id.clone(),
                                shop_id: approval.shop_id.clone(),
                                is_approved: approval.is_approved,
                                total_amount: approval.total_amount,
                            },
                        ));
                        ctx.save_refund_approval(approval);
                    }
                    request.fanout_done = true;
                }
            }
            RefundTargetStatus::Rejected => {
                // Admin override: force-reject every line and
                // short-circuit the request
                for detail in &mut request.details {
                    detail.state = detail.state.force_reject();
                }
                request.assign_status = AssignStatus::Rejected;
            }
        }

        // 4. Stage the request
        request.updated_at = metadata.timestamp;
        let assign_status = request.assign_status;
        let request_id = request.id.clone();
        ctx.save_refund_request(request);

        // 5. Emit status event
        let seq = ctx.next_sequence();
        events.push(SettlementEvent::new(
            seq,
            request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::RefundStatusChanged,
            EventPayload::RefundStatusChanged {
                request_id,
                assign_status,
            },
        ));

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SettlementStorage;
    use rust_decimal::Decimal;
    use shared::models::{Product, RefundRequest, RefundRequestDetail, StockCounters};

    fn metadata() -> CommandMetadata {
        CommandMetadata {
            command_id: "cmd-1".to_string(),
            operator_id: "user-1".to_string(),
            operator_name: "Test User".to_string(),
            timestamp: 1234567890,
        }
    }

    fn detail(id: &str, state: RefundLineState) -> RefundRequestDetail {
        RefundRequestDetail {
            id: id.to_string(),
            shop_invoice_id: "si-1".to_string(),
            shop_id: "s1".to_string(),
            merchant_id: "m1".to_string(),
            product_id: "p1".to_string(),
            variant_id: None,
            product_name: "product p1".to_string(),
            unit_price: Decimal::from(10),
            requested_quantity: 5,
            reason: "damaged".to_string(),
            state,
        }
    }

    fn request(details: Vec<RefundRequestDetail>) -> RefundRequest {
        let total = details.iter().map(|d| d.refundable_amount()).sum();
        RefundRequest {
            id: "req-1".to_string(),
            order_id: "ord-1".to_string(),
            customer_id: "u1".to_string(),
            details,
            total_refundable_amount: total,
            assign_status: AssignStatus::UnAssigned,
            fanout_done: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn seed_product(storage: &SettlementStorage, txn: &redb::WriteTransaction) {
        storage
            .put_product_unchecked(
                txn,
                &Product {
                    id: "p1".to_string(),
                    name: "product p1".to_string(),
                    shop_id: "s1".to_string(),
                    price: Decimal::from(10),
                    vat_percent: Decimal::ZERO,
                    weight_grams: 100,
                    low_stock_threshold: 0,
                    stock: StockCounters {
                        quantity: 0,
                        reserved: 0,
                        sold: 5,
                        version: 1,
                    },
                    has_variants: false,
                    is_active: true,
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn picking_advances_lines() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage
            .put_refund_request(&txn, &request(vec![detail("d1", RefundLineState::Requested)]))
            .unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateRefundStatusAction {
            request_id: "req-1".to_string(),
            lines: vec![RefundAdjudicationInput {
                detail_id: "d1".to_string(),
                picked_quantity: Some(4),
                approved_quantity: None,
            }],
            target_status: RefundTargetStatus::Picked,
        };
        action.execute(&mut ctx, &metadata()).await.unwrap();

        let request = ctx.load_refund_request("req-1").unwrap();
        assert_eq!(
            request.details[0].state,
            RefundLineState::Picked { picked_quantity: 4 }
        );
        assert!(!request.fanout_done);
    }

    #[tokio::test]
    async fn approval_fans_out_and_restocks() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        seed_product(&storage, &txn);
        storage
            .put_refund_request(
                &txn,
                &request(vec![detail(
                    "d1",
                    RefundLineState::Picked { picked_quantity: 5 },
                )]),
            )
            .unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateRefundStatusAction {
            request_id: "req-1".to_string(),
            lines: vec![RefundAdjudicationInput {
                detail_id: "d1".to_string(),
                picked_quantity: None,
                approved_quantity: Some(3),
            }],
            target_status: RefundTargetStatus::Approved,
        };
        let events = action.execute(&mut ctx, &metadata()).await.unwrap();

        // one approval bucket, one rejection bucket, one status event
        let approval_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == SettlementEventType::RefundApprovalIssued)
            .collect();
        assert_eq!(approval_events.len(), 2);

        let request = ctx.load_refund_request("req-1").unwrap();
        assert!(request.fanout_done);

        // approved units restocked
        let stock = ctx.load_product("p1").unwrap().stock;
        assert_eq!(stock.quantity, 3);
        assert_eq!(stock.sold, 2);
    }

    #[tokio::test]
    async fn second_adjudication_does_not_duplicate_buckets() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        seed_product(&storage, &txn);
        let mut req = request(vec![detail(
            "d1",
            RefundLineState::Approved {
                picked_quantity: 5,
                approved_quantity: 3,
            },
        )]);
        req.fanout_done = true;
        storage.put_refund_request(&txn, &req).unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateRefundStatusAction {
            request_id: "req-1".to_string(),
            lines: vec![],
            target_status: RefundTargetStatus::Approved,
        };
        let events = action.execute(&mut ctx, &metadata()).await.unwrap();

        assert!(
            events
                .iter()
                .all(|e| e.event_type != SettlementEventType::RefundApprovalIssued)
        );
    }

    #[tokio::test]
    async fn admin_override_force_rejects_everything() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage
            .put_refund_request(
                &txn,
                &request(vec![
                    detail("d1", RefundLineState::Requested),
                    detail("d2", RefundLineState::Picked { picked_quantity: 2 }),
                ]),
            )
            .unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateRefundStatusAction {
            request_id: "req-1".to_string(),
            lines: vec![],
            target_status: RefundTargetStatus::Rejected,
        };
        action.execute(&mut ctx, &metadata()).await.unwrap();

        let request = ctx.load_refund_request("req-1").unwrap();
        assert_eq!(request.assign_status, AssignStatus::Rejected);
        assert!(request.details.iter().all(|d| d.state.is_terminal()));
    }

    #[tokio::test]
    async fn terminal_request_is_immutable() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let mut req = request(vec![detail("d1", RefundLineState::Requested)]);
        req.assign_status = AssignStatus::Closed;
        storage.put_refund_request(&txn, &req).unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateRefundStatusAction {
            request_id: "req-1".to_string(),
            lines: vec![],
            target_status: RefundTargetStatus::Picked,
        };
        let result = action.execute(&mut ctx, &metadata()).await;
        assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
    }
}
