//! Settlement events - immutable facts recorded after command processing
//!
//! Events are persisted append-only in the command transaction (outbox)
//! and broadcast to subscribers only after commit. The notification
//! worker forwards the relevant ones to the external collaborators;
//! delivery is fire-and-forget and never feeds back into the
//! transaction.

use crate::models::{AssignStatus, OrderStatus, ShipmentStatus, ShippingDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement event - immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Event unique ID
    pub event_id: String,
    /// Global sequence number (for ordering and outbox replay)
    pub sequence: u64,
    /// Primary entity this event belongs to (cart, order, request, ...)
    pub entity_id: String,
    /// Server timestamp (Unix milliseconds)
    pub timestamp: i64,
    /// Operator who triggered this event
    pub operator_id: String,
    /// Operator name (snapshot for audit)
    pub operator_name: String,
    /// Command that triggered this event (for audit tracing)
    pub command_id: String,
    /// Event type
    pub event_type: SettlementEventType,
    /// Event payload
    pub payload: EventPayload,
}

/// Event type enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementEventType {
    // Cart / order
    CartReplaced,
    OrderCreated,
    OrderStatusChanged,

    // Inventory
    LowStock,
    StockDepleted,

    // Refund workflow
    RefundRequested,
    RefundStatusChanged,
    RefundApprovalIssued,
    RefundShipmentAssigned,
    ShipmentStatusChanged,
    RefundClosed,

    // Balance ledger
    WithdrawalRequested,
    WithdrawalStatusChanged,
}

impl std::fmt::Display for SettlementEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SettlementEventType::CartReplaced => "CART_REPLACED",
            SettlementEventType::OrderCreated => "ORDER_CREATED",
            SettlementEventType::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            SettlementEventType::LowStock => "LOW_STOCK",
            SettlementEventType::StockDepleted => "STOCK_DEPLETED",
            SettlementEventType::RefundRequested => "REFUND_REQUESTED",
            SettlementEventType::RefundStatusChanged => "REFUND_STATUS_CHANGED",
            SettlementEventType::RefundApprovalIssued => "REFUND_APPROVAL_ISSUED",
            SettlementEventType::RefundShipmentAssigned => "REFUND_SHIPMENT_ASSIGNED",
            SettlementEventType::ShipmentStatusChanged => "SHIPMENT_STATUS_CHANGED",
            SettlementEventType::RefundClosed => "REFUND_CLOSED",
            SettlementEventType::WithdrawalRequested => "WITHDRAWAL_REQUESTED",
            SettlementEventType::WithdrawalStatusChanged => "WITHDRAWAL_STATUS_CHANGED",
        };
        write!(f, "{}", s)
    }
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    CartReplaced {
        user_id: String,
        cart_id: String,
        line_count: usize,
        additional_shipping_cost: Decimal,
    },

    OrderCreated {
        order_id: String,
        order_number: String,
        customer_id: String,
        invoice_id: String,
        invoice_total: Decimal,
        payable_total: Decimal,
        shop_count: usize,
    },

    OrderStatusChanged {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Post-decrement quantity fell at or below the low-stock threshold
    LowStock {
        product_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
        product_name: String,
        remaining: u32,
        threshold: u32,
    },

    /// Quantity reached zero; the search indexer drops the product
    StockDepleted {
        product_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
        product_name: String,
    },

    RefundRequested {
        request_id: String,
        order_id: String,
        customer_id: String,
        line_count: usize,
        total_refundable_amount: Decimal,
    },

    RefundStatusChanged {
        request_id: String,
        assign_status: AssignStatus,
    },

    /// Emitted once per fan-out bucket (per-shop approved, aggregate
    /// rejected)
    RefundApprovalIssued {
        request_id: String,
        approval_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shop_id: Option<String>,
        is_approved: bool,
        total_amount: Decimal,
    },

    RefundShipmentAssigned {
        request_id: String,
        assignment_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_id: Option<String>,
        transporter_id: String,
        shipping_type: ShippingDirection,
    },

    ShipmentStatusChanged {
        assignment_id: String,
        request_id: String,
        status: ShipmentStatus,
    },

    RefundClosed {
        request_id: String,
        order_id: String,
        total_refundable_amount: Decimal,
    },

    WithdrawalRequested {
        request_id: String,
        merchant_id: String,
        amount: Decimal,
        available_before: Decimal,
    },

    WithdrawalStatusChanged {
        request_id: String,
        merchant_id: String,
        status: crate::models::WithdrawalStatus,
    },
}

impl SettlementEvent {
    /// Build an event from its command context
    pub fn new(
        sequence: u64,
        entity_id: String,
        operator_id: String,
        operator_name: String,
        command_id: String,
        timestamp: i64,
        event_type: SettlementEventType,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            sequence,
            entity_id,
            timestamp,
            operator_id,
            operator_name,
            command_id,
            event_type,
            payload,
        }
    }
}
