//! CreateWithdrawal command handler
//!
//! Opens a withdrawal request against the merchant's available balance.
//! The balance is recomputed inside this transaction so the check and
//! the insert cannot race with a concurrent withdrawal.

use async_trait::async_trait;

use crate::money::validate_amount;
use crate::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use rust_decimal::Decimal;
use shared::models::{MerchantWithdrawalRequest, WithdrawalStatus};
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};

/// CreateWithdrawal action
///
/// `minimum_withdrawal` comes from the engine configuration via the
/// manager.
#[derive(Debug, Clone)]
pub struct CreateWithdrawalAction {
    pub merchant_id: String,
    pub amount: Decimal,
    pub bank_account_id: String,
    pub minimum_withdrawal: Decimal,
}

#[async_trait]
impl CommandHandler for CreateWithdrawalAction {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError> {
        // 1. Validate input
        validate_amount(self.amount, "withdrawal amount")?;
        if self.bank_account_id.is_empty() {
            return Err(EngineError::Validation(
                "bank_account_id must not be empty".to_string(),
            ));
        }
        let merchant = ctx.load_merchant(&self.merchant_id)?;
        if !merchant.is_active {
            return Err(EngineError::Validation(format!(
                "merchant {} is not active",
                merchant.id
            )));
        }

        // 2. Balance check, recomputed fresh on every request
        let balance = ctx.balance(&self.merchant_id)?;
        if self.amount < self.minimum_withdrawal || self.amount > balance.available {
            return Err(EngineError::InsufficientBalance {
                requested: self.amount,
                available: balance.available,
            });
        }

        // 3. Stage the request
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = MerchantWithdrawalRequest {
            id: request_id.clone(),
            merchant_id: self.merchant_id.clone(),
            amount: self.amount,
            paid_amount: None,
            bank_account_id: self.bank_account_id.clone(),
            status: WithdrawalStatus::Pending,
            created_at: metadata.timestamp,
            updated_at: metadata.timestamp,
        };
        ctx.save_withdrawal(request);

        // 4. Emit event
        let seq = ctx.next_sequence();
        let event = SettlementEvent::new(
            seq,
            request_id.clone(),
            metadata.operator_id.clone(),
            metadata.operator_name.clone(),
            metadata.command_id.clone(),
            metadata.timestamp,
            SettlementEventType::WithdrawalRequested,
            EventPayload::WithdrawalRequested {
                request_id,
                merchant_id: self.merchant_id.clone(),
                amount: self.amount,
                available_before: balance.available,
            },
        );

        Ok(vec![event])
    }
}
