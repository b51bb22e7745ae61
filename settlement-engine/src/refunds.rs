//! Refund adjudication fan-out and closure rules
//!
//! After every line of a request is adjudicated, the fan-out partitions
//! the outcome into buckets: one approval bucket per shop carrying the
//! approved quantities, and a single rejection bucket across all shops
//! carrying the picked-minus-approved deltas. The request's `fanout_done`
//! flag guards against a second adjudication call duplicating buckets.

use rust_decimal::Decimal;
use shared::models::{
    RefundApproval, RefundApprovalLine, RefundLineState, RefundRequest,
    RefundShipmentAssignment, ShipmentStatus, ShippingDirection,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Whether every line of the request has reached a terminal state
pub fn all_lines_adjudicated(request: &RefundRequest) -> bool {
    request.details.iter().all(|d| d.state.is_terminal())
}

/// Partition adjudicated lines into approval and rejection buckets
///
/// Approved quantities go into per-shop buckets in first-seen detail
/// order; rejected deltas accumulate into one shared bucket with no
/// shop. Buckets with no lines are not emitted.
pub fn fan_out_approvals(request: &RefundRequest, created_at: i64) -> Vec<RefundApproval> {
    let mut approvals: Vec<RefundApproval> = Vec::new();
    let mut shop_index: HashMap<String, usize> = HashMap::new();
    let mut rejected_lines: Vec<RefundApprovalLine> = Vec::new();

    for detail in &request.details {
        let picked = detail.state.picked_quantity();
        let approved = detail.state.approved_quantity();

        if approved > 0 {
            let idx = *shop_index.entry(detail.shop_id.clone()).or_insert_with(|| {
                approvals.push(RefundApproval {
                    id: Uuid::new_v4().to_string(),
                    request_id: request.id.clone(),
                    shop_id: Some(detail.shop_id.clone()),
                    is_approved: true,
                    lines: Vec::new(),
                    total_amount: Decimal::ZERO,
                    assignment_id: None,
                    created_at,
                });
                approvals.len() - 1
            });
            let amount = detail.unit_price * Decimal::from(approved);
            approvals[idx].lines.push(RefundApprovalLine {
                detail_id: detail.id.clone(),
                product_id: detail.product_id.clone(),
                product_name: detail.product_name.clone(),
                shop_id: detail.shop_id.clone(),
                quantity: approved,
                unit_price: detail.unit_price,
                amount,
            });
            approvals[idx].total_amount += amount;
        }

        // Rejected delta: everything picked but not approved
        let rejected = picked.saturating_sub(approved);
        if rejected > 0 {
            rejected_lines.push(RefundApprovalLine {
                detail_id: detail.id.clone(),
                product_id: detail.product_id.clone(),
                product_name: detail.product_name.clone(),
                shop_id: detail.shop_id.clone(),
                quantity: rejected,
                unit_price: detail.unit_price,
                amount: detail.unit_price * Decimal::from(rejected),
            });
        }
    }

    if !rejected_lines.is_empty() {
        let total_amount = rejected_lines.iter().map(|l| l.amount).sum();
        approvals.push(RefundApproval {
            id: Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            shop_id: None,
            is_approved: false,
            lines: rejected_lines,
            total_amount,
            assignment_id: None,
            created_at,
        });
    }

    approvals
}

/// Shipment direction for a new assignment
///
/// Derived once at assignment creation: approved buckets return goods to
/// the shop, rejected buckets return them to the customer, and the
/// legacy pre-adjudication path collects from the customer.
pub fn direction_for(approval: Option<&RefundApproval>) -> ShippingDirection {
    match approval {
        Some(a) if a.is_approved => ShippingDirection::ReturnToShop,
        Some(_) => ShippingDirection::ReturnToCustomer,
        None => ShippingDirection::CollectFromCustomer,
    }
}

/// A request closes when every one of its shipment assignments is
/// delivered; a request with no assignments never closes this way.
pub fn all_shipments_delivered(assignments: &[RefundShipmentAssignment]) -> bool {
    !assignments.is_empty()
        && assignments
            .iter()
            .all(|a| a.status == ShipmentStatus::Delivered)
}
