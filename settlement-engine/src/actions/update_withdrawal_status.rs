//! UpdateWithdrawalStatus command handler
//!
//! Adjudicates a pending withdrawal. Approval records the paid amount
//! (defaulting to the requested amount); any terminal status frees the
//! pending hold on the merchant's balance.

use async_trait::async_trait;

use crate::money::validate_amount;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use rust_decimal::Decimal;
use shared::models::WithdrawalStatus;
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};

/// UpdateWithdrawalStatus action
#[derive(Debug, Clone)]
pub struct UpdateWithdrawalStatusAction {
    pub request_id: String,
    pub status: WithdrawalStatus,
    pub paid_amount: Option<Decimal>,
}

#[async_trait]
impl CommandHandler for UpdateWithdrawalStatusAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Load; only pending requests can be adjudicated
        let mut request = ctx.load_withdrawal(&self.request_id)?;
        if request.status != WithdrawalStatus::Pending {
            return Err(EngineError::InvalidTransition(format!(
                "withdrawal {} is already {:?}",
                request.id, request.status
            )));
        }
        if self.status == WithdrawalStatus::Pending {
            return Err(EngineError::Validation(
                "target status must be terminal".to_string(),
            ));
        }

        // 2. Approval fixes the paid amount
        if self.status == WithdrawalStatus::Approved {
            let paid = self.paid_amount.unwrap_or(request.amount);
            validate_amount(paid, "paid amount")?;
            if paid > request.amount {
                return Err(EngineError::Validation(format!(
                    "paid amount {} exceeds requested amount {}",
                    paid, request.amount
                )));
            }
            request.paid_amount = Some(paid);
        }

        // 3. Stage the request
        request.status = self.status;
        request.updated_at = metadata.timestamp;
        let merchant_id = request.merchant_id.clone();
        ctx.save_withdrawal(request);

        // 4. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            self.request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::WithdrawalStatusChanged,
            EventPayload::WithdrawalStatusChanged {
                request_id: self.request_id.clone(),
                merchant_id,
                status: self.status,
            },
        );

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SettlementStorage;
    use shared::models::MerchantWithdrawalRequest;

    fn metadata() -> CommandMetadata {
        CommandMetadata {
            command_id: "cmd-1".to_string(),
            operator_id: "user-1".to_string(),
            operator_name: "Test User".to_string(),
            timestamp: 1234567890,
        }
    }

    fn pending(amount: u32) -> MerchantWithdrawalRequest {
        MerchantWithdrawalRequest {
            id: "w-1".to_string(),
            merchant_id: "m1".to_string(),
            amount: Decimal::from(amount),
            paid_amount: None,
            bank_account_id: "acc-1".to_string(),
            status: WithdrawalStatus::Pending,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn approval_defaults_paid_to_requested() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_withdrawal(&txn, &pending(500)).unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateWithdrawalStatusAction {
            request_id: "w-1".to_string(),
            status: WithdrawalStatus::Approved,
            paid_amount: None,
        };
        action.execute(&mut ctx, &metadata()).await.unwrap();

        let request = ctx.load_withdrawal("w-1").unwrap();
        assert_eq!(request.status, WithdrawalStatus::Approved);
        assert_eq!(request.paid_amount, Some(Decimal::from(500)));
    }

    #[tokio::test]
    async fn paid_amount_cannot_exceed_requested() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_withdrawal(&txn, &pending(500)).unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateWithdrawalStatusAction {
            request_id: "w-1".to_string(),
            status: WithdrawalStatus::Approved,
            paid_amount: Some(Decimal::from(600)),
        };
        let result = action.execute(&mut ctx, &metadata()).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn adjudicated_request_is_terminal() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let mut request = pending(500);
        request.status = WithdrawalStatus::Rejected;
        storage.put_withdrawal(&txn, &request).unwrap();

        let mut ctx = CommandContext::new(&txn, &storage, 0);
        let action = UpdateWithdrawalStatusAction {
            request_id: "w-1".to_string(),
            status: WithdrawalStatus::Approved,
            paid_amount: None,
        };
        let result = action.execute(&mut ctx, &metadata()).await;
        assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
    }
}
