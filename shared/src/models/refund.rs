//! Refund workflow models
//!
//! A refund request tracks per-line adjudication (requested -> picked ->
//! approved | rejected) independently of the request-level routing state
//! (`AssignStatus`). Line state is a closed tagged variant with explicit
//! transition functions instead of mutable integer status fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Illegal refund line transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefundTransitionError {
    #[error("cannot pick a line in state {0}")]
    NotPickable(String),
    #[error("cannot adjudicate a line in state {0}")]
    NotAdjudicable(String),
    #[error("picked quantity {picked} exceeds requested quantity {requested}")]
    PickedExceedsRequested { picked: u32, requested: u32 },
    #[error("approved quantity {approved} exceeds picked quantity {picked}")]
    ApprovedExceedsPicked { approved: u32, picked: u32 },
}

/// Per-line refund state
///
/// REQUEST -> PICKED -> { APPROVED, REJECTED }, terminal at the end.
/// An approval of zero quantity lands in `Rejected`; a partial approval
/// lands in `Approved` and the picked-approved delta is routed to the
/// rejection bucket by the fan-out step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundLineState {
    Requested,
    Picked { picked_quantity: u32 },
    Approved { picked_quantity: u32, approved_quantity: u32 },
    Rejected { picked_quantity: u32 },
}

impl RefundLineState {
    /// Record the picked quantity, REQUEST -> PICKED
    pub fn pick(&self, picked: u32, requested: u32) -> Result<Self, RefundTransitionError> {
        match self {
            RefundLineState::Requested => {
                if picked > requested {
                    return Err(RefundTransitionError::PickedExceedsRequested {
                        picked,
                        requested,
                    });
                }
                Ok(RefundLineState::Picked {
                    picked_quantity: picked,
                })
            }
            other => Err(RefundTransitionError::NotPickable(other.status_name())),
        }
    }

    /// Adjudicate a picked line, PICKED -> APPROVED | REJECTED
    ///
    /// `approved == 0` rejects the whole picked quantity.
    pub fn adjudicate(&self, approved: u32) -> Result<Self, RefundTransitionError> {
        match *self {
            RefundLineState::Picked { picked_quantity } => {
                if approved > picked_quantity {
                    return Err(RefundTransitionError::ApprovedExceedsPicked {
                        approved,
                        picked: picked_quantity,
                    });
                }
                if approved == 0 {
                    Ok(RefundLineState::Rejected { picked_quantity })
                } else {
                    Ok(RefundLineState::Approved {
                        picked_quantity,
                        approved_quantity: approved,
                    })
                }
            }
            ref other => Err(RefundTransitionError::NotAdjudicable(other.status_name())),
        }
    }

    /// Force-reject from any non-terminal state (admin override)
    pub fn force_reject(&self) -> Self {
        match *self {
            RefundLineState::Requested => RefundLineState::Rejected { picked_quantity: 0 },
            RefundLineState::Picked { picked_quantity } => {
                RefundLineState::Rejected { picked_quantity }
            }
            ref terminal => terminal.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefundLineState::Approved { .. } | RefundLineState::Rejected { .. }
        )
    }

    /// Approved quantity, zero unless the line reached APPROVED
    pub fn approved_quantity(&self) -> u32 {
        match *self {
            RefundLineState::Approved {
                approved_quantity, ..
            } => approved_quantity,
            _ => 0,
        }
    }

    /// Picked quantity, zero before PICKED
    pub fn picked_quantity(&self) -> u32 {
        match *self {
            RefundLineState::Picked { picked_quantity }
            | RefundLineState::Approved {
                picked_quantity, ..
            }
            | RefundLineState::Rejected { picked_quantity } => picked_quantity,
            RefundLineState::Requested => 0,
        }
    }

    fn status_name(&self) -> String {
        match self {
            RefundLineState::Requested => "REQUEST",
            RefundLineState::Picked { .. } => "PICKED",
            RefundLineState::Approved { .. } => "APPROVED",
            RefundLineState::Rejected { .. } => "REJECTED",
        }
        .to_string()
    }
}

/// Request-level routing state, distinct from per-line refund status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignStatus {
    UnAssigned,
    Assigned,
    /// Terminal; only Closed refunds affect merchant balances
    Closed,
    /// Terminal; admin short-circuit
    Rejected,
}

impl AssignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AssignStatus::Closed | AssignStatus::Rejected)
    }
}

/// One refunded line of a shop invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequestDetail {
    pub id: String,
    pub shop_invoice_id: String,
    pub shop_id: String,
    pub merchant_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub unit_price: Decimal,
    pub requested_quantity: u32,
    pub reason: String,
    pub state: RefundLineState,
}

impl RefundRequestDetail {
    /// unit price x requested quantity
    pub fn refundable_amount(&self) -> Decimal {
        self.unit_price * Decimal::from(self.requested_quantity)
    }
}

/// Refund request aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: String,
    pub order_id: String,
    pub customer_id: String,
    pub details: Vec<RefundRequestDetail>,
    /// Sum of detail refundable amounts, fixed at creation
    pub total_refundable_amount: Decimal,
    pub assign_status: AssignStatus,
    /// Set by the first successful approval fan-out; a second
    /// adjudication call must not duplicate approval rows
    #[serde(default)]
    pub fanout_done: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One approved or rejected line inside a RefundApproval bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundApprovalLine {
    pub detail_id: String,
    pub product_id: String,
    pub product_name: String,
    pub shop_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Adjudication bucket emitted by the approval fan-out
///
/// One per shop for approved quantities (`is_approved`), plus at most
/// one aggregate across all shops for rejected deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundApproval {
    pub id: String,
    pub request_id: String,
    /// Present for per-shop approval buckets, absent for the aggregate
    /// rejection bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<String>,
    pub is_approved: bool,
    pub lines: Vec<RefundApprovalLine>,
    pub total_amount: Decimal,
    /// Shipment assignment handling this bucket, once assigned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    pub created_at: i64,
}

/// Direction of a refund shipment
///
/// Derived from `is_approved` once at assignment creation and never
/// re-derived later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingDirection {
    /// Legacy path: the request itself is assigned before adjudication
    CollectFromCustomer,
    ReturnToShop,
    ReturnToCustomer,
}

/// Shipment assignment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Assigned,
    PickedUp,
    Delivered,
}

impl ShipmentStatus {
    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        matches!(
            (self, next),
            (ShipmentStatus::Assigned, ShipmentStatus::PickedUp)
                | (ShipmentStatus::PickedUp, ShipmentStatus::Delivered)
        )
    }
}

/// Link between a RefundApproval (or raw request, legacy path) and a
/// transporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundShipmentAssignment {
    pub id: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub transporter_id: String,
    pub shipping_type: ShippingDirection,
    pub status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_up_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    pub created_at: i64,
}
