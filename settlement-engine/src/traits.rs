//! Command handler traits and execution context
//!
//! Every external operation is an action implementing [`CommandHandler`].
//! Actions run against a [`CommandContext`] that stages entity mutations
//! inside one redb write transaction; the manager persists the staged
//! writes and commits, so a failed action leaves no partial state
//! behind.

use crate::storage::{SettlementStorage, StorageError};
use async_trait::async_trait;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::models::{
    Address, Cart, Coupon, CustomerInvoice, Merchant, MerchantInvoice,
    MerchantWithdrawalRequest, Order, Product, ProductVariant, RefundApproval, RefundRequest,
    RefundShipmentAssignment, RefundTransitionError, ShippingRateTable, Shop, ShopInvoice,
};
use shared::settlement::{SettlementEvent, StockShortage};
use std::collections::HashMap;
use thiserror::Error;

/// Action-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Business-rule rejection enumerating every offending line
    #[error("insufficient stock: {}", format_shortages(.0))]
    InsufficientStock(Vec<StockShortage>),

    /// Stock moved between cart creation and order assembly
    #[error("stock exceeded for {0}")]
    StockExceeded(String),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// Internal reconciliation failure; must abort, never persist
    #[error("inconsistent settlement: {0}")]
    InconsistentSettlement(String),

    /// Lost a compare-and-swap race on a stock counter; retry the whole
    /// command
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

fn format_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict(id, expected, found) => EngineError::ConcurrencyConflict(
                format!("{}: expected version {}, found {}", id, expected, found),
            ),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<RefundTransitionError> for EngineError {
    fn from(err: RefundTransitionError) -> Self {
        EngineError::InvalidTransition(err.to_string())
    }
}

/// Command metadata passed to every action
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    pub command_id: String,
    pub operator_id: String,
    pub operator_name: String,
    pub timestamp: i64,
}

/// Command handler trait implemented by every action
#[async_trait]
pub trait CommandHandler {
    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Vec<SettlementEvent>, EngineError>;
}

/// Staged entity writes, keyed by id
///
/// Loads prefer the staged copy so an action observes its own writes;
/// nothing reaches the tables until the manager persists and commits.
#[derive(Default)]
struct StagedWrites {
    products: HashMap<String, Product>,
    /// Counter version at first load, the CAS expectation at persist time
    product_versions: HashMap<String, u64>,
    variants: HashMap<String, ProductVariant>,
    variant_versions: HashMap<String, u64>,
    carts: HashMap<String, Cart>,
    orders: HashMap<String, Order>,
    customer_invoices: HashMap<String, CustomerInvoice>,
    shop_invoices: HashMap<String, ShopInvoice>,
    merchant_invoices: HashMap<String, MerchantInvoice>,
    refund_requests: HashMap<String, RefundRequest>,
    refund_approvals: HashMap<String, RefundApproval>,
    assignments: HashMap<String, RefundShipmentAssignment>,
    withdrawals: HashMap<String, MerchantWithdrawalRequest>,
}

/// Execution context for one command
pub struct CommandContext<'a> {
    txn: &'a WriteTransaction,
    storage: &'a SettlementStorage,
    sequence: u64,
    staged: StagedWrites,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        txn: &'a WriteTransaction,
        storage: &'a SettlementStorage,
        current_sequence: u64,
    ) -> Self {
        Self {
            txn,
            storage,
            sequence: current_sequence,
            staged: StagedWrites::default(),
        }
    }

    /// Allocate the next event sequence number
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }

    // ========== Catalog (read-only within commands) ==========

    pub fn load_shop(&self, id: &str) -> Result<Shop, EngineError> {
        self.storage
            .get_shop_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("shop", id))
    }

    pub fn load_merchant(&self, id: &str) -> Result<Merchant, EngineError> {
        self.storage
            .get_merchant_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("merchant", id))
    }

    pub fn load_address(&self, id: &str) -> Result<Address, EngineError> {
        self.storage
            .get_address_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("address", id))
    }

    pub fn load_coupon(&self, code: &str) -> Result<Coupon, EngineError> {
        self.storage
            .get_coupon_txn(self.txn, code)?
            .ok_or_else(|| EngineError::not_found("coupon", code))
    }

    /// Shipping rate table; absent configuration means no surcharge
    pub fn rate_table(&self) -> Result<ShippingRateTable, EngineError> {
        Ok(self
            .storage
            .get_rate_table_txn(self.txn)?
            .unwrap_or_default())
    }

    // ========== Products / variants (hot counters, CAS-tracked) ==========

    pub fn load_product(&mut self, id: &str) -> Result<Product, EngineError> {
        if let Some(p) = self.staged.products.get(id) {
            return Ok(p.clone());
        }
        let product = self
            .storage
            .get_product_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("product", id))?;
        self.staged
            .product_versions
            .entry(id.to_string())
            .or_insert(product.stock.version);
        Ok(product)
    }

    pub fn save_product(&mut self, product: Product) {
        self.staged
            .product_versions
            .entry(product.id.clone())
            .or_insert(product.stock.version);
        self.staged.products.insert(product.id.clone(), product);
    }

    pub fn load_variant(&mut self, id: &str) -> Result<ProductVariant, EngineError> {
        if let Some(v) = self.staged.variants.get(id) {
            return Ok(v.clone());
        }
        let variant = self
            .storage
            .get_variant_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("variant", id))?;
        self.staged
            .variant_versions
            .entry(id.to_string())
            .or_insert(variant.stock.version);
        Ok(variant)
    }

    pub fn save_variant(&mut self, variant: ProductVariant) {
        self.staged
            .variant_versions
            .entry(variant.id.clone())
            .or_insert(variant.stock.version);
        self.staged.variants.insert(variant.id.clone(), variant);
    }

    // ========== Carts ==========

    pub fn load_cart(&mut self, id: &str) -> Result<Cart, EngineError> {
        if let Some(c) = self.staged.carts.get(id) {
            return Ok(c.clone());
        }
        self.storage
            .get_cart_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("cart", id))
    }

    pub fn save_cart(&mut self, cart: Cart) {
        self.staged.carts.insert(cart.id.clone(), cart);
    }

    /// The user's open cart, if any
    pub fn find_open_cart(&mut self, user_id: &str) -> Result<Option<Cart>, EngineError> {
        match self.storage.get_open_cart_id_txn(self.txn, user_id)? {
            Some(cart_id) => Ok(Some(self.load_cart(&cart_id)?)),
            None => Ok(None),
        }
    }

    // ========== Orders and invoices ==========

    pub fn load_order(&mut self, id: &str) -> Result<Order, EngineError> {
        if let Some(o) = self.staged.orders.get(id) {
            return Ok(o.clone());
        }
        self.storage
            .get_order_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("order", id))
    }

    pub fn save_order(&mut self, order: Order) {
        self.staged.orders.insert(order.id.clone(), order);
    }

    pub fn load_customer_invoice(&mut self, id: &str) -> Result<CustomerInvoice, EngineError> {
        if let Some(i) = self.staged.customer_invoices.get(id) {
            return Ok(i.clone());
        }
        self.storage
            .get_customer_invoice_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("customer invoice", id))
    }

    pub fn save_customer_invoice(&mut self, invoice: CustomerInvoice) {
        self.staged
            .customer_invoices
            .insert(invoice.id.clone(), invoice);
    }

    pub fn load_shop_invoice(&mut self, id: &str) -> Result<ShopInvoice, EngineError> {
        if let Some(i) = self.staged.shop_invoices.get(id) {
            return Ok(i.clone());
        }
        self.storage
            .get_shop_invoice_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("shop invoice", id))
    }

    pub fn save_shop_invoice(&mut self, invoice: ShopInvoice) {
        self.staged.shop_invoices.insert(invoice.id.clone(), invoice);
    }

    /// All shop invoices of an order, staged copies preferred
    pub fn shop_invoices_for_order(
        &mut self,
        order_id: &str,
    ) -> Result<Vec<ShopInvoice>, EngineError> {
        let ids = self
            .storage
            .shop_invoice_ids_for_order_txn(self.txn, order_id)?;
        let mut invoices = Vec::with_capacity(ids.len());
        for id in ids {
            invoices.push(self.load_shop_invoice(&id)?);
        }
        // Staged invoices not yet indexed (created this command)
        for inv in self.staged.shop_invoices.values() {
            if inv.order_id == order_id && !invoices.iter().any(|i| i.id == inv.id) {
                invoices.push(inv.clone());
            }
        }
        Ok(invoices)
    }

    pub fn load_merchant_invoice(&mut self, id: &str) -> Result<MerchantInvoice, EngineError> {
        if let Some(i) = self.staged.merchant_invoices.get(id) {
            return Ok(i.clone());
        }
        self.storage
            .get_merchant_invoice_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("merchant invoice", id))
    }

    pub fn save_merchant_invoice(&mut self, invoice: MerchantInvoice) {
        self.staged
            .merchant_invoices
            .insert(invoice.id.clone(), invoice);
    }

    // ========== Refund workflow ==========

    pub fn load_refund_request(&mut self, id: &str) -> Result<RefundRequest, EngineError> {
        if let Some(r) = self.staged.refund_requests.get(id) {
            return Ok(r.clone());
        }
        self.storage
            .get_refund_request_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("refund request", id))
    }

    pub fn save_refund_request(&mut self, request: RefundRequest) {
        self.staged
            .refund_requests
            .insert(request.id.clone(), request);
    }

    pub fn load_refund_approval(&mut self, id: &str) -> Result<RefundApproval, EngineError> {
        if let Some(a) = self.staged.refund_approvals.get(id) {
            return Ok(a.clone());
        }
        self.storage
            .get_refund_approval_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("refund approval", id))
    }

    pub fn save_refund_approval(&mut self, approval: RefundApproval) {
        self.staged
            .refund_approvals
            .insert(approval.id.clone(), approval);
    }

    pub fn load_assignment(
        &mut self,
        id: &str,
    ) -> Result<RefundShipmentAssignment, EngineError> {
        if let Some(a) = self.staged.assignments.get(id) {
            return Ok(a.clone());
        }
        self.storage
            .get_assignment_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("shipment assignment", id))
    }

    pub fn save_assignment(&mut self, assignment: RefundShipmentAssignment) {
        self.staged
            .assignments
            .insert(assignment.id.clone(), assignment);
    }

    /// All shipment assignments of a refund request, staged copies
    /// preferred
    pub fn assignments_for_request(
        &mut self,
        request_id: &str,
    ) -> Result<Vec<RefundShipmentAssignment>, EngineError> {
        let ids = self
            .storage
            .assignment_ids_for_request_txn(self.txn, request_id)?;
        let mut assignments = Vec::with_capacity(ids.len());
        for id in ids {
            assignments.push(self.load_assignment(&id)?);
        }
        for a in self.staged.assignments.values() {
            if a.request_id == request_id && !assignments.iter().any(|x| x.id == a.id) {
                assignments.push(a.clone());
            }
        }
        Ok(assignments)
    }

    // ========== Withdrawals ==========

    pub fn load_withdrawal(
        &mut self,
        id: &str,
    ) -> Result<MerchantWithdrawalRequest, EngineError> {
        if let Some(w) = self.staged.withdrawals.get(id) {
            return Ok(w.clone());
        }
        self.storage
            .get_withdrawal_txn(self.txn, id)?
            .ok_or_else(|| EngineError::not_found("withdrawal request", id))
    }

    pub fn save_withdrawal(&mut self, withdrawal: MerchantWithdrawalRequest) {
        self.staged
            .withdrawals
            .insert(withdrawal.id.clone(), withdrawal);
    }

    /// Merchant balance recomputed inside this transaction
    pub fn balance(
        &self,
        merchant_id: &str,
    ) -> Result<shared::models::BalanceSnapshot, EngineError> {
        Ok(crate::balance::compute_balance_txn(
            self.storage,
            self.txn,
            merchant_id,
        )?)
    }

    // ========== Persistence (manager only) ==========

    /// Flush all staged writes to the transaction's tables
    ///
    /// Products and variants go through the version-guarded puts; a
    /// conflict surfaces as `ConcurrencyConflict` and aborts the whole
    /// command. Index tables are maintained here so actions never touch
    /// them directly.
    pub(crate) fn persist(&mut self) -> Result<(), EngineError> {
        for product in self.staged.products.values() {
            let expected = self
                .staged
                .product_versions
                .get(&product.id)
                .copied()
                .unwrap_or(product.stock.version);
            self.storage
                .put_product_guarded(self.txn, product, expected)?;
        }
        for variant in self.staged.variants.values() {
            let expected = self
                .staged
                .variant_versions
                .get(&variant.id)
                .copied()
                .unwrap_or(variant.stock.version);
            self.storage
                .put_variant_guarded(self.txn, variant, expected)?;
        }
        for cart in self.staged.carts.values() {
            self.storage.put_cart(self.txn, cart)?;
            if cart.is_open() {
                self.storage.set_open_cart(self.txn, &cart.user_id, &cart.id)?;
            } else {
                self.storage.clear_open_cart(self.txn, &cart.user_id)?;
            }
        }
        for order in self.staged.orders.values() {
            self.storage.put_order(self.txn, order)?;
        }
        for invoice in self.staged.customer_invoices.values() {
            self.storage.put_customer_invoice(self.txn, invoice)?;
        }
        for invoice in self.staged.shop_invoices.values() {
            self.storage.put_shop_invoice(self.txn, invoice)?;
        }
        for invoice in self.staged.merchant_invoices.values() {
            self.storage.put_merchant_invoice(self.txn, invoice)?;
        }
        for request in self.staged.refund_requests.values() {
            self.storage.put_refund_request(self.txn, request)?;
        }
        for approval in self.staged.refund_approvals.values() {
            self.storage.put_refund_approval(self.txn, approval)?;
        }
        for assignment in self.staged.assignments.values() {
            self.storage.put_assignment(self.txn, assignment)?;
        }
        for withdrawal in self.staged.withdrawals.values() {
            self.storage.put_withdrawal(self.txn, withdrawal)?;
        }
        Ok(())
    }
}
