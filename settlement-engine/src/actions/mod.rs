//! Command action implementations
//!
//! Each action implements the `CommandHandler` trait and handles
//! one specific command type.

use async_trait::async_trait;

use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use shared::settlement::{SettlementCommand, SettlementCommandPayload, SettlementEvent};

mod assign_refund_shipment;
mod create_order;
mod create_refund_request;
mod create_withdrawal;
mod replace_cart;
mod update_order_status;
mod update_refund_status;
mod update_shipment_status;
mod update_withdrawal_status;

pub use assign_refund_shipment::AssignRefundShipmentAction;
pub use create_order::CreateOrderAction;
pub use create_refund_request::CreateRefundRequestAction;
pub use create_withdrawal::CreateWithdrawalAction;
pub use replace_cart::ReplaceCartAction;
pub use update_order_status::UpdateOrderStatusAction;
pub use update_refund_status::UpdateRefundStatusAction;
pub use update_shipment_status::UpdateShipmentStatusAction;
pub use update_withdrawal_status::UpdateWithdrawalStatusAction;

/// CommandAction enum - dispatches to concrete action implementations
pub enum CommandAction {
    ReplaceCart(ReplaceCartAction),
    CreateOrder(CreateOrderAction),
    UpdateOrderStatus(UpdateOrderStatusAction),
    CreateRefundRequest(CreateRefundRequestAction),
    UpdateRefundStatus(UpdateRefundStatusAction),
    AssignRefundShipment(AssignRefundShipmentAction),
    UpdateShipmentStatus(UpdateShipmentStatusAction),
    CreateWithdrawal(CreateWithdrawalAction),
    UpdateWithdrawalStatus(UpdateWithdrawalStatusAction),
}

/// Manual implementation of CommandHandler for CommandAction
#[async_trait]
impl CommandHandler for CommandAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        match self {
            CommandAction::ReplaceCart(action) => action.execute(ctx, metadata).await,
            CommandAction::CreateOrder(action) => action.execute(ctx, metadata).await,
            CommandAction::UpdateOrderStatus(action) => action.execute(ctx, metadata).await,
            CommandAction::CreateRefundRequest(action) => action.execute(ctx, metadata).await,
            CommandAction::UpdateRefundStatus(action) => action.execute(ctx, metadata).await,
            CommandAction::AssignRefundShipment(action) => action.execute(ctx, metadata).await,
            CommandAction::UpdateShipmentStatus(action) => action.execute(ctx, metadata).await,
            CommandAction::CreateWithdrawal(action) => action.execute(ctx, metadata).await,
            CommandAction::UpdateWithdrawalStatus(action) => action.execute(ctx, metadata).await,
        }
    }
}

/// Convert SettlementCommand to CommandAction
///
/// This is the ONLY place with a match on SettlementCommandPayload.
impl From<&SettlementCommand> for CommandAction {
    fn from(cmd: &SettlementCommand) -> Self {
        match &cmd.payload {
            SettlementCommandPayload::ReplaceCart { user_id, lines } => {
                CommandAction::ReplaceCart(ReplaceCartAction {
                    user_id: user_id.clone(),
                    lines: lines.clone(),
                })
            }
            SettlementCommandPayload::CreateOrder { .. } => {
                // CreateOrder is built by the SettlementManager, which
                // pre-generates order and invoice numbers outside the
                // write transaction. This path should never be reached.
                unreachable!("CreateOrder is constructed by SettlementManager")
            }
            SettlementCommandPayload::CreateWithdrawal { .. } => {
                // CreateWithdrawal carries the configured minimum and is
                // built by the SettlementManager as well.
                unreachable!("CreateWithdrawal is constructed by SettlementManager")
            }
            SettlementCommandPayload::UpdateOrderStatus {
                order_id,
                status,
                payment_method,
            } => CommandAction::UpdateOrderStatus(UpdateOrderStatusAction {
                order_id: order_id.clone(),
                status: *status,
                payment_method: *payment_method,
            }),
            SettlementCommandPayload::CreateRefundRequest { order_id, lines } => {
                CommandAction::CreateRefundRequest(CreateRefundRequestAction {
                    order_id: order_id.clone(),
                    lines: lines.clone(),
                })
            }
            SettlementCommandPayload::UpdateRefundStatus {
                request_id,
                lines,
                target_status,
            } => CommandAction::UpdateRefundStatus(UpdateRefundStatusAction {
                request_id: request_id.clone(),
                lines: lines.clone(),
                target_status: *target_status,
            }),
            SettlementCommandPayload::AssignRefundShipment {
                request_id,
                approval_id,
                transporter_id,
            } => CommandAction::AssignRefundShipment(AssignRefundShipmentAction {
                request_id: request_id.clone(),
                approval_id: approval_id.clone(),
                transporter_id: transporter_id.clone(),
            }),
            SettlementCommandPayload::UpdateShipmentStatus {
                assignment_id,
                status,
            } => CommandAction::UpdateShipmentStatus(UpdateShipmentStatusAction {
                assignment_id: assignment_id.clone(),
                status: *status,
            }),
            SettlementCommandPayload::UpdateWithdrawalStatus {
                request_id,
                status,
                paid_amount,
            } => CommandAction::UpdateWithdrawalStatus(UpdateWithdrawalStatusAction {
                request_id: request_id.clone(),
                status: *status,
                paid_amount: *paid_amount,
            }),
        }
    }
}
