//! Merchant balance ledger
//!
//! The balance is never stored; every consumer recomputes it from the
//! merchant's shop invoices, closed refunds and withdrawal history. The
//! withdrawal action recomputes inside its own transaction so the check
//! and the insert see the same state.

use crate::storage::{SettlementStorage, StorageError};
use chrono::Utc;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::models::{
    AssignStatus, BalanceSnapshot, MerchantWithdrawalRequest, RefundRequest, ShopInvoice,
    WithdrawalStatus,
};

/// Net merchant proceeds of one shop invoice
///
/// Commission goes to the platform; both shipping components pass
/// through to the transporter and never reach the merchant.
fn net_sale(invoice: &ShopInvoice) -> Decimal {
    invoice.invoice_total
        - invoice.commission
        - invoice.shipping_cost
        - invoice.additional_shipping_cost
}

/// Approved refund amount this merchant carries for one closed request
///
/// A request can span several merchants; only details belonging to this
/// merchant's shops count against its balance.
fn refund_share(request: &RefundRequest, merchant_id: &str) -> Decimal {
    request
        .details
        .iter()
        .filter(|d| d.merchant_id == merchant_id)
        .map(|d| d.unit_price * Decimal::from(d.state.approved_quantity()))
        .sum()
}

fn build_snapshot(
    merchant_id: &str,
    shop_invoices: Vec<ShopInvoice>,
    refunds: Vec<RefundRequest>,
    withdrawals: Vec<MerchantWithdrawalRequest>,
) -> BalanceSnapshot {
    let total_sale: Decimal = shop_invoices.iter().map(net_sale).sum();

    // Only Closed refunds have actually returned money to the customer
    let total_refund: Decimal = refunds
        .iter()
        .filter(|r| r.assign_status == AssignStatus::Closed)
        .map(|r| refund_share(r, merchant_id))
        .sum();

    let mut total_withdrawal = Decimal::ZERO;
    let mut total_pending_withdrawal = Decimal::ZERO;
    for w in &withdrawals {
        match w.status {
            WithdrawalStatus::Approved => {
                total_withdrawal += w.paid_amount.unwrap_or(w.amount);
            }
            WithdrawalStatus::Pending => {
                total_pending_withdrawal += w.amount;
            }
            WithdrawalStatus::Rejected | WithdrawalStatus::Cancelled => {}
        }
    }

    BalanceSnapshot {
        merchant_id: merchant_id.to_string(),
        total_sale,
        total_withdrawal,
        total_pending_withdrawal,
        total_refund,
        available: total_sale - total_withdrawal - total_pending_withdrawal - total_refund,
        computed_at: Utc::now().timestamp_millis(),
    }
}

/// Compute the balance from committed state (query path)
pub fn compute_balance(
    storage: &SettlementStorage,
    merchant_id: &str,
) -> Result<BalanceSnapshot, StorageError> {
    let mut shop_invoices = Vec::new();
    for id in storage.shop_invoice_ids_for_merchant(merchant_id)? {
        if let Some(invoice) = storage.get_shop_invoice(&id)? {
            shop_invoices.push(invoice);
        }
    }
    let mut refunds = Vec::new();
    for id in storage.refund_ids_for_merchant(merchant_id)? {
        if let Some(request) = storage.get_refund_request(&id)? {
            refunds.push(request);
        }
    }
    let mut withdrawals = Vec::new();
    for id in storage.withdrawal_ids_for_merchant(merchant_id)? {
        if let Some(w) = storage.get_withdrawal(&id)? {
            withdrawals.push(w);
        }
    }
    Ok(build_snapshot(
        merchant_id,
        shop_invoices,
        refunds,
        withdrawals,
    ))
}

/// Compute the balance inside a write transaction (withdrawal check)
pub fn compute_balance_txn(
    storage: &SettlementStorage,
    txn: &WriteTransaction,
    merchant_id: &str,
) -> Result<BalanceSnapshot, StorageError> {
    let mut shop_invoices = Vec::new();
    for id in storage.shop_invoice_ids_for_merchant_txn(txn, merchant_id)? {
        if let Some(invoice) = storage.get_shop_invoice_txn(txn, &id)? {
            shop_invoices.push(invoice);
        }
    }
    let mut refunds = Vec::new();
    for id in storage.refund_ids_for_merchant_txn(txn, merchant_id)? {
        if let Some(request) = storage.get_refund_request_txn(txn, &id)? {
            refunds.push(request);
        }
    }
    let mut withdrawals = Vec::new();
    for id in storage.withdrawal_ids_for_merchant_txn(txn, merchant_id)? {
        if let Some(w) = storage.get_withdrawal_txn(txn, &id)? {
            withdrawals.push(w);
        }
    }
    Ok(build_snapshot(
        merchant_id,
        shop_invoices,
        refunds,
        withdrawals,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{PaymentMethod, PaymentStatus, RefundLineState, RefundRequestDetail};

    fn shop_invoice(total: u32, commission: u32, surcharge: u32) -> ShopInvoice {
        ShopInvoice {
            id: "si-1".to_string(),
            customer_invoice_id: "inv-1".to_string(),
            order_id: "ord-1".to_string(),
            shop_id: "s-1".to_string(),
            merchant_id: "m-1".to_string(),
            merchant_invoice_id: "mi-1".to_string(),
            payment_method: PaymentMethod::Card,
            payment_status: PaymentStatus::Paid,
            lines: Vec::new(),
            shipping_cost: Decimal::ZERO,
            additional_shipping_cost: Decimal::from(surcharge),
            invoice_total: Decimal::from(total),
            commission: Decimal::from(commission),
            created_at: 0,
        }
    }

    fn withdrawal(amount: u32, status: WithdrawalStatus) -> MerchantWithdrawalRequest {
        MerchantWithdrawalRequest {
            id: "w-1".to_string(),
            merchant_id: "m-1".to_string(),
            amount: Decimal::from(amount),
            paid_amount: None,
            bank_account_id: "acc-1".to_string(),
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn closed_refund(merchant_id: &str, price: u32, approved: u32) -> RefundRequest {
        RefundRequest {
            id: "r-1".to_string(),
            order_id: "ord-1".to_string(),
            customer_id: "c-1".to_string(),
            details: vec![RefundRequestDetail {
                id: "d-1".to_string(),
                shop_invoice_id: "si-1".to_string(),
                shop_id: "s-1".to_string(),
                merchant_id: merchant_id.to_string(),
                product_id: "p-1".to_string(),
                variant_id: None,
                product_name: "item".to_string(),
                unit_price: Decimal::from(price),
                requested_quantity: approved,
                reason: "damaged".to_string(),
                state: RefundLineState::Approved {
                    picked_quantity: approved,
                    approved_quantity: approved,
                },
            }],
            total_refundable_amount: Decimal::from(price * approved),
            assign_status: AssignStatus::Closed,
            fanout_done: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn sale_nets_out_commission_and_shipping() {
        // 220 total, 20 commission, 20 surcharge -> 180 to the merchant
        assert_eq!(net_sale(&shop_invoice(220, 20, 20)), Decimal::from(180));
    }

    #[test]
    fn pending_withdrawals_reduce_available() {
        let snapshot = build_snapshot(
            "m-1",
            vec![shop_invoice(1000, 0, 0)],
            Vec::new(),
            vec![withdrawal(400, WithdrawalStatus::Pending)],
        );
        assert_eq!(snapshot.total_sale, Decimal::from(1000));
        assert_eq!(snapshot.total_pending_withdrawal, Decimal::from(400));
        assert_eq!(snapshot.available, Decimal::from(600));
    }

    #[test]
    fn rejected_and_cancelled_withdrawals_do_not_count() {
        let snapshot = build_snapshot(
            "m-1",
            vec![shop_invoice(500, 0, 0)],
            Vec::new(),
            vec![
                withdrawal(100, WithdrawalStatus::Rejected),
                withdrawal(100, WithdrawalStatus::Cancelled),
            ],
        );
        assert_eq!(snapshot.available, Decimal::from(500));
    }

    #[test]
    fn approved_withdrawal_prefers_paid_amount() {
        let mut w = withdrawal(300, WithdrawalStatus::Approved);
        w.paid_amount = Some(Decimal::from(250));
        let snapshot = build_snapshot("m-1", vec![shop_invoice(500, 0, 0)], Vec::new(), vec![w]);
        assert_eq!(snapshot.total_withdrawal, Decimal::from(250));
        assert_eq!(snapshot.available, Decimal::from(250));
    }

    #[test]
    fn closed_refund_counts_only_own_details() {
        let snapshot = build_snapshot(
            "m-1",
            vec![shop_invoice(500, 0, 0)],
            vec![closed_refund("m-1", 10, 3), closed_refund("m-other", 99, 1)],
            Vec::new(),
        );
        assert_eq!(snapshot.total_refund, Decimal::from(30));
        assert_eq!(snapshot.available, Decimal::from(470));
    }

    #[test]
    fn open_refunds_do_not_reduce_balance() {
        let mut open = closed_refund("m-1", 10, 3);
        open.assign_status = AssignStatus::Assigned;
        let snapshot =
            build_snapshot("m-1", vec![shop_invoice(500, 0, 0)], vec![open], Vec::new());
        assert_eq!(snapshot.total_refund, Decimal::ZERO);
    }
}
