//! AssignRefundShipment command handler
//!
//! Hands a refund approval bucket (or, on the legacy path, the raw
//! request) to a transporter. The shipping direction is derived from the
//! bucket's outcome once, here, and never re-derived afterwards.

use async_trait::async_trait;

use crate::refunds::direction_for;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::models::{AssignStatus, RefundShipmentAssignment, ShipmentStatus};
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};

/// AssignRefundShipment action
#[derive(Debug, Clone)]
pub struct AssignRefundShipmentAction {
    pub request_id: String,
    pub approval_id: Option<String>,
    pub transporter_id: String,
}

#[async_trait]
impl CommandHandler for AssignRefundShipmentAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Validate input and request state
        if self.transporter_id.is_empty() {
            return Err(EngineError::Validation(
                "transporter_id must not be empty".to_string(),
            ));
        }
        let mut request = ctx.load_refund_request(&self.request_id)?;
        if request.assign_status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "refund request {} is already {:?}",
                request.id, request.assign_status
            )));
        }

        // 2. Resolve the approval bucket, if this is not the legacy path
        let assignment_id = uuid::Uuid::new_v4().to_string();
        let shipping_type = match &self.approval_id {
            Some(approval_id) => {
                let mut approval = ctx.load_refund_approval(approval_id)?;
                if approval.request_id != self.request_id {
                    return Err(EngineError::Validation(format!(
                        "approval {} does not belong to request {}",
                        approval.id, self.request_id
                    )));
                }
                if approval.assignment_id.is_some() {
                    return Err(EngineError::InvalidOperation(format!(
                        "approval {} is already assigned",
                        approval.id
                    )));
                }
                let direction = direction_for(Some(&approval));
                approval.assignment_id = Some(assignment_id.clone());
                ctx.save_refund_approval(approval);
                direction
            }
            None => direction_for(None),
        };

        // 3. Create the assignment and advance the request routing state
        let assignment = RefundShipmentAssignment {
            id: assignment_id.clone(),
            request_id: self.request_id.clone(),
            approval_id: self.approval_id.clone(),
            transporter_id: self.transporter_id.clone(),
            shipping_type,
            status: ShipmentStatus::Assigned,
            picked_up_at: None,
            received_at: None,
            created_at: metadata.timestamp,
        };
        ctx.save_assignment(assignment);

        request.assign_status = AssignStatus::Assigned;
        request.updated_at = metadata.timestamp;
        ctx.save_refund_request(request);

        // 4. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            self.request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::RefundShipmentAssigned,
            EventPayload::RefundShipmentAssigned {
                request_id: self.request_id.clone(),
                assignment_id,
                approval_id: self.approval_id.clone(),
                transporter_id: self.transporter_id.clone(),
                shipping_type,
            },
        );

        Ok(vec![event])
    }
}
