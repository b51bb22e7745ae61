//! UpdateShipmentStatus command handler
//!
//! Advances a refund shipment. A delivery triggers the closure check:
//! once every assignment of the request is delivered, the request moves
//! to Closed and starts counting against the merchant's balance.

use async_trait::async_trait;

use crate::refunds::all_shipments_delivered;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{AssignStatus, ShipmentStatus};
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};

/// UpdateShipmentStatus action
#[derive(Debug, Clone)]
pub struct UpdateShipmentStatusAction {
    pub assignment_id: String,
    pub status: ShipmentStatus,
}

#[async_trait]
impl CommandHandler for UpdateShipmentStatusAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Load and validate the transition
        let mut assignment = ctx.load_assignment(&self.assignment_id)?;
        if !assignment.status.can_transition_to(self.status) {
            return Err(EngineError::InvalidTransition(format!(
                "shipment {}: {:?} -> {:?}",
                assignment.id, assignment.status, self.status
            )));
        }

        // 2. Stage the assignment with its lifecycle timestamps
        assignment.status = self.status;
        match self.status {
            ShipmentStatus::PickedUp => assignment.picked_up_at = Some(metadata.timestamp),
            ShipmentStatus::Delivered => assignment.received_at = Some(metadata.timestamp),
            ShipmentStatus::Assigned => {}
        }
        let request_id = assignment.request_id.clone();
        ctx.save_assignment(assignment);

        let seq = ctx.next_sequence();
        let mut events = vec![SettlementEvent::new(
            seq,
            request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::ShipmentStatusChanged,
            EventPayload::ShipmentStatusChanged {
                assignment_id: self.assignment_id.clone(),
                request_id: request_id.clone(),
                status: self.status,
            },
        )];

        // 3. Closure check: all assignments of the request delivered
        if self.status == ShipmentStatus::Delivered {
            let mut request = ctx.load_refund_request(&request_id)?;
            if !request.assign_status.is_terminal() {
                let assignments = ctx.assignments_for_request(&request_id)?;
                if all_shipments_delivered(&assignments) {
                    request.assign_status = AssignStatus::Closed;
                    request.updated_at = metadata.timestamp;
                    let seq = ctx.next_sequence();
                    events.push(SettlementEvent::new(
                        seq,
                        request_id.clone(),
                        metadata.operator_id.clone(),
                        metadata.operator_name.clone(),
                        metadata.command_id.clone(),
                        metadata.timestamp,
                        SettlementEventType::RefundClosed,
                        EventPayload::RefundClosed {
                            request_id: request_id.clone(),
                            order_id: request.order_id.clone(),
                            total_refundable_amount: request.total_refundable_amount,
                        },
                    ));
                    ctx.save_refund_request(request);
                }
            }
        }

        Ok(events)
    }
}
