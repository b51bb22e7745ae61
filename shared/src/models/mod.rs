//! Domain models
//!
//! Persisted entities of the settlement pipeline. Plain serde structs;
//! the engine crate owns all multi-entity logic, while small
//! self-contained state machines (refund line state, shipping rate
//! lookup) live next to their types.

pub mod address;
pub mod cart;
pub mod coupon;
pub mod invoice;
pub mod order;
pub mod product;
pub mod rate_table;
pub mod refund;
pub mod shop;
pub mod withdrawal;

pub use address::Address;
pub use cart::{Cart, CartLine};
pub use coupon::{Coupon, DiscountKind};
pub use invoice::{
    CustomerInvoice, InvoiceLine, MerchantInvoice, PaymentMethod, PaymentStatus, ShopInvoice,
    ShopInvoiceLine,
};
pub use order::{Order, OrderLine, OrderStatus};
pub use product::{Product, ProductVariant, StockCounters};
pub use rate_table::{RateTier, ShippingRateTable};
pub use refund::{
    AssignStatus, RefundApproval, RefundApprovalLine, RefundLineState, RefundRequest,
    RefundRequestDetail, RefundShipmentAssignment, RefundTransitionError, ShipmentStatus,
    ShippingDirection,
};
pub use shop::{Merchant, Shop};
pub use withdrawal::{BalanceSnapshot, MerchantWithdrawalRequest, WithdrawalStatus};
