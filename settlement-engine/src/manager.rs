//! SettlementManager - command processing entry point
//!
//! Commands run through the action layer inside one redb write
//! transaction: idempotency check, action execution against a staged
//! context, event append, sequence bump, commit. Events are broadcast
//! to subscribers only after the commit succeeds.

use super::actions::{CommandAction, CreateOrderAction, CreateWithdrawalAction};
use super::balance;
use super::config::EngineConfig;
use super::storage::{SettlementStorage, StorageError};
use super::traits::{CommandContext, CommandHandler, CommandMetadata, EngineError};
use chrono::Local;
use shared::models::{
    Address, BalanceSnapshot, Cart, Coupon, CustomerInvoice, Merchant, MerchantInvoice,
    MerchantWithdrawalRequest, Order, Product, ProductVariant, RefundApproval, RefundRequest,
    RefundShipmentAssignment, ShippingRateTable, Shop, ShopInvoice,
};
use shared::settlement::{
    CommandError, CommandErrorCode, CommandResponse, SettlementCommand, SettlementCommandPayload,
    SettlementEvent,
};
use std::path::Path;
use thiserror::Error;
use tokio::sync::broadcast;

/// Manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Map a storage failure to an error code (the caller localizes)
fn classify_storage_error(e: &StorageError) -> CommandErrorCode {
    match e {
        StorageError::Serialization(_) => return CommandErrorCode::InternalError,
        StorageError::EntityNotFound(_, _) => return CommandErrorCode::NotFound,
        StorageError::VersionConflict(_, _, _) => return CommandErrorCode::ConcurrencyConflict,
        _ => {}
    }

    // redb errors are classified by string matching
    let err_str = e.to_string().to_lowercase();

    if err_str.contains("no space") || err_str.contains("disk full") || err_str.contains("enospc")
    {
        return CommandErrorCode::StorageFull;
    }

    if err_str.contains("out of memory") || err_str.contains("cannot allocate") {
        return CommandErrorCode::OutOfMemory;
    }

    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        return CommandErrorCode::StorageCorrupted;
    }

    CommandErrorCode::SystemBusy
}

impl From<ManagerError> for CommandError {
    fn from(err: ManagerError) -> Self {
        let (code, message) = match err {
            ManagerError::Storage(e) => {
                let code = classify_storage_error(&e);
                let message = e.to_string();
                tracing::error!(error = %e, error_code = ?code, "Storage error occurred");
                (code, message)
            }
            ManagerError::Engine(e) => {
                let code = match &e {
                    EngineError::Validation(_) => CommandErrorCode::ValidationFailed,
                    EngineError::NotFound { .. } => CommandErrorCode::NotFound,
                    EngineError::InsufficientStock(_) => CommandErrorCode::InsufficientStock,
                    EngineError::StockExceeded(_) => CommandErrorCode::StockExceeded,
                    EngineError::InsufficientBalance { .. } => {
                        CommandErrorCode::InsufficientBalance
                    }
                    EngineError::InconsistentSettlement(_) => {
                        // Internal invariant violation; the transaction
                        // was aborted, nothing was persisted
                        tracing::error!(error = %e, "Settlement reconciliation failed");
                        CommandErrorCode::InconsistentSettlement
                    }
                    EngineError::ConcurrencyConflict(_) => CommandErrorCode::ConcurrencyConflict,
                    EngineError::InvalidTransition(_) => CommandErrorCode::InvalidTransition,
                    EngineError::InvalidOperation(_) => CommandErrorCode::InvalidOperation,
                    EngineError::Storage(_) => CommandErrorCode::InternalError,
                };
                (code, e.to_string())
            }
        };
        CommandError::new(code, message)
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Event broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 65536;

/// SettlementManager for command processing
///
/// The `epoch` field is a unique identifier generated on each startup.
/// Clients use it to detect server restarts and trigger full resync.
pub struct SettlementManager {
    storage: SettlementStorage,
    event_tx: broadcast::Sender<SettlementEvent>,
    /// Server instance epoch - unique ID generated on startup
    epoch: String,
    config: EngineConfig,
}

impl std::fmt::Debug for SettlementManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementManager")
            .field("storage", &"<SettlementStorage>")
            .field("event_tx", &"<broadcast::Sender>")
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl SettlementManager {
    /// Create a new SettlementManager with the given database path
    pub fn new(db_path: impl AsRef<Path>, config: EngineConfig) -> ManagerResult<Self> {
        let storage = SettlementStorage::open(db_path)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let epoch = uuid::Uuid::new_v4().to_string();
        tracing::info!(epoch = %epoch, "SettlementManager started with new epoch");
        Ok(Self {
            storage,
            event_tx,
            epoch,
            config,
        })
    }

    /// Create a SettlementManager with existing storage (for testing)
    #[cfg(test)]
    pub fn with_storage(storage: SettlementStorage, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let epoch = uuid::Uuid::new_v4().to_string();
        Self {
            storage,
            event_tx,
            epoch,
            config,
        }
    }

    /// Get the server epoch (unique instance ID)
    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Subscribe to event broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.event_tx.subscribe()
    }

    /// Get the underlying storage
    pub fn storage(&self) -> &SettlementStorage {
        &self.storage
    }

    /// Generate the next order/invoice number pair (crash-safe via redb)
    ///
    /// Both numbers come from one counter increment so an order and its
    /// customer invoice always share a suffix.
    fn next_document_numbers(&self) -> ManagerResult<(String, String)> {
        let count = self.storage.next_order_count()?;
        let date_str = Local::now().format("%Y%m%d").to_string();
        Ok((
            format!("ORD-{}-{:06}", date_str, count),
            format!("INV-{}-{:06}", date_str, count),
        ))
    }

    /// Execute a command and return the response
    pub fn execute_command(&self, cmd: SettlementCommand) -> CommandResponse {
        match self.process_command(cmd.clone()) {
            Ok((response, events)) => {
                // Broadcast events after successful commit
                for event in events {
                    let _ = self.event_tx.send(event);
                }
                response
            }
            Err(err) => CommandResponse::error(cmd.command_id, err.into()),
        }
    }

    /// Process command and return response with events
    ///
    /// 1. Convert command to CommandAction
    /// 2. Execute action against a staged context
    /// 3. Persist staged writes and events atomically
    fn process_command(
        &self,
        cmd: SettlementCommand,
    ) -> ManagerResult<(CommandResponse, Vec<SettlementEvent>)> {
        tracing::info!(command_id = %cmd.command_id, payload = ?cmd.payload, "Processing command");

        // 1. Idempotency check (before transaction)
        if self.storage.is_command_processed(&cmd.command_id)? {
            tracing::warn!(command_id = %cmd.command_id, "Duplicate command");
            return Ok((CommandResponse::duplicate(cmd.command_id), vec![]));
        }

        // 2. Pre-generate order/invoice numbers for CreateOrder (BEFORE
        //    the transaction; the counter lives in its own write
        //    transaction and redb does not nest writes)
        let pre_generated_numbers = match &cmd.payload {
            SettlementCommandPayload::CreateOrder { .. } => {
                let numbers = self.next_document_numbers()?;
                tracing::info!(order_number = %numbers.0, "Pre-generated document numbers");
                Some(numbers)
            }
            _ => None,
        };

        // 3. Begin write transaction
        let txn = self.storage.begin_write()?;

        // Double-check idempotency within transaction
        if self.storage.is_command_processed_txn(&txn, &cmd.command_id)? {
            return Ok((CommandResponse::duplicate(cmd.command_id), vec![]));
        }

        // 4. Get current sequence for context initialization
        let current_sequence = self.storage.get_current_sequence()?;

        // 5. Create context and metadata
        let mut ctx = CommandContext::new(&txn, &self.storage, current_sequence);
        let metadata = CommandMetadata {
            command_id: cmd.command_id.clone(),
            operator_id: cmd.operator_id.clone(),
            operator_name: cmd.operator_name.clone(),
            timestamp: cmd.timestamp,
        };

        // 6. Convert to action and execute
        // CreateOrder and CreateWithdrawal carry manager-provided inputs
        // (pre-generated numbers, configured minimum) and are built here
        let action: CommandAction = match &cmd.payload {
            SettlementCommandPayload::CreateOrder {
                cart_id,
                shipping_address_id,
                billing_address_id,
                coupon_code,
                payment_method,
            } => {
                let (order_number, invoice_number) = pre_generated_numbers
                    .ok_or_else(|| EngineError::Storage("document numbers missing".into()))?;
                CommandAction::CreateOrder(CreateOrderAction {
                    cart_id: cart_id.clone(),
                    shipping_address_id: shipping_address_id.clone(),
                    billing_address_id: billing_address_id.clone(),
                    coupon_code: coupon_code.clone(),
                    payment_method: *payment_method,
                    order_number,
                    invoice_number,
                    coupon_match: self.config.coupon_match,
                })
            }
            SettlementCommandPayload::CreateWithdrawal {
                merchant_id,
                amount,
                bank_account_id,
            } => CommandAction::CreateWithdrawal(CreateWithdrawalAction {
                merchant_id: merchant_id.clone(),
                amount: *amount,
                bank_account_id: bank_account_id.clone(),
                minimum_withdrawal: self.config.minimum_withdrawal,
            }),
            _ => (&cmd).into(),
        };
        let events = futures::executor::block_on(action.execute(&mut ctx, &metadata))
            .map_err(ManagerError::from)?;

        // 7. Persist staged entity writes
        ctx.persist()?;

        // 8. Persist events (outbox)
        for event in &events {
            self.storage.store_event(&txn, event)?;
        }

        // 9. Update sequence counter
        let max_sequence = events
            .iter()
            .map(|e| e.sequence)
            .max()
            .unwrap_or(current_sequence);
        if max_sequence > current_sequence {
            self.storage.set_sequence(&txn, max_sequence)?;
        }

        // 10. Mark command processed
        self.storage.mark_command_processed(&txn, &cmd.command_id)?;

        // 11. Commit transaction
        txn.commit().map_err(StorageError::from)?;

        // 12. Return response
        let entity_id = events.first().map(|e| e.entity_id.clone());
        tracing::info!(
            command_id = %cmd.command_id,
            entity_id = ?entity_id,
            event_count = events.len(),
            "Command processed successfully"
        );
        Ok((CommandResponse::success(cmd.command_id, entity_id), events))
    }

    // ========== Public Query Methods ==========

    /// Get a cart by ID
    pub fn get_cart(&self, cart_id: &str) -> ManagerResult<Option<Cart>> {
        Ok(self.storage.get_cart(cart_id)?)
    }

    /// Get the user's open cart, if any
    pub fn get_open_cart(&self, user_id: &str) -> ManagerResult<Option<Cart>> {
        match self.storage.get_open_cart_id(user_id)? {
            Some(cart_id) => Ok(self.storage.get_cart(&cart_id)?),
            None => Ok(None),
        }
    }

    /// Get an order by ID
    pub fn get_order(&self, order_id: &str) -> ManagerResult<Option<Order>> {
        Ok(self.storage.get_order(order_id)?)
    }

    /// Get a customer invoice by ID
    pub fn get_customer_invoice(
        &self,
        invoice_id: &str,
    ) -> ManagerResult<Option<CustomerInvoice>> {
        Ok(self.storage.get_customer_invoice(invoice_id)?)
    }

    /// Get the shop invoices split from an order
    pub fn get_shop_invoices_for_order(&self, order_id: &str) -> ManagerResult<Vec<ShopInvoice>> {
        let mut invoices = Vec::new();
        for id in self.storage.shop_invoice_ids_for_order(order_id)? {
            if let Some(invoice) = self.storage.get_shop_invoice(&id)? {
                invoices.push(invoice);
            }
        }
        Ok(invoices)
    }

    /// Get a merchant invoice by ID
    pub fn get_merchant_invoice(
        &self,
        invoice_id: &str,
    ) -> ManagerResult<Option<MerchantInvoice>> {
        Ok(self.storage.get_merchant_invoice(invoice_id)?)
    }

    /// Get a refund request by ID
    pub fn get_refund_request(&self, request_id: &str) -> ManagerResult<Option<RefundRequest>> {
        Ok(self.storage.get_refund_request(request_id)?)
    }

    /// Get the approval buckets fanned out from a refund request
    pub fn get_approvals_for_request(
        &self,
        request_id: &str,
    ) -> ManagerResult<Vec<RefundApproval>> {
        let mut approvals = Vec::new();
        for id in self.storage.approval_ids_for_request(request_id)? {
            if let Some(approval) = self.storage.get_refund_approval(&id)? {
                approvals.push(approval);
            }
        }
        Ok(approvals)
    }

    /// Get the shipment assignments of a refund request
    pub fn get_assignments_for_request(
        &self,
        request_id: &str,
    ) -> ManagerResult<Vec<RefundShipmentAssignment>> {
        let mut assignments = Vec::new();
        for id in self.storage.assignment_ids_for_request(request_id)? {
            if let Some(assignment) = self.storage.get_assignment(&id)? {
                assignments.push(assignment);
            }
        }
        Ok(assignments)
    }

    /// Get a withdrawal request by ID
    pub fn get_withdrawal(
        &self,
        request_id: &str,
    ) -> ManagerResult<Option<MerchantWithdrawalRequest>> {
        Ok(self.storage.get_withdrawal(request_id)?)
    }

    /// Compute a merchant's balance from committed state
    ///
    /// Always derived fresh from invoices, refunds and withdrawals;
    /// nothing is cached.
    pub fn get_balance(&self, merchant_id: &str) -> ManagerResult<BalanceSnapshot> {
        Ok(balance::compute_balance(&self.storage, merchant_id)?)
    }

    /// Get the current global sequence number
    pub fn get_current_sequence(&self) -> ManagerResult<u64> {
        Ok(self.storage.get_current_sequence()?)
    }

    /// Get events after the given sequence (outbox replay)
    pub fn get_events_since(&self, sequence: u64) -> ManagerResult<Vec<SettlementEvent>> {
        Ok(self.storage.get_events_since(sequence)?)
    }

    // ========== Catalog Maintenance ==========
    //
    // Catalog writes go through small standalone transactions; they are
    // reference data, not command-processed state.

    /// Insert or update a product
    ///
    /// A zero low-stock threshold is replaced with the configured
    /// default.
    pub fn upsert_product(&self, mut product: Product) -> ManagerResult<()> {
        if product.low_stock_threshold == 0 {
            product.low_stock_threshold = self.config.default_low_stock_threshold;
        }
        let txn = self.storage.begin_write()?;
        self.storage.put_product_unchecked(&txn, &product)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Insert or update a product variant
    pub fn upsert_variant(&self, variant: &ProductVariant) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_variant_unchecked(&txn, variant)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Insert or update a shop
    pub fn upsert_shop(&self, shop: &Shop) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_shop(&txn, shop)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Insert or update a merchant
    pub fn upsert_merchant(&self, merchant: &Merchant) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_merchant(&txn, merchant)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Insert or update an address
    pub fn upsert_address(&self, address: &Address) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_address(&txn, address)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Insert or update a coupon
    pub fn upsert_coupon(&self, coupon: &Coupon) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_coupon(&txn, coupon)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Replace the shipping rate table
    pub fn set_rate_table(&self, table: &ShippingRateTable) -> ManagerResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.put_rate_table(&txn, table)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }
}

impl Clone for SettlementManager {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            event_tx: self.event_tx.clone(),
            epoch: self.epoch.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CouponMatch;
    use rust_decimal::Decimal;
    use shared::models::{
        DiscountKind, OrderStatus, PaymentMethod, PaymentStatus, RefundLineState, ShipmentStatus,
        StockCounters, WithdrawalStatus,
    };
    use shared::settlement::{
        CartLineInput, RefundAdjudicationInput, RefundLineInput, RefundTargetStatus,
        SettlementEventType,
    };

    fn test_config() -> EngineConfig {
        EngineConfig {
            work_dir: ".".to_string(),
            minimum_withdrawal: Decimal::from(500),
            default_low_stock_threshold: 5,
            coupon_match: CouponMatch::UserId,
        }
    }

    fn manager() -> SettlementManager {
        let storage = SettlementStorage::open_in_memory().unwrap();
        SettlementManager::with_storage(storage, test_config())
    }

    fn cmd(payload: SettlementCommandPayload) -> SettlementCommand {
        SettlementCommand::new("op-1", "Operator", payload)
    }

    fn product(id: &str, shop: &str, price: u32, quantity: u32) -> Product {
        Product {
            id: id.to_string(),
            name: format!("product {}", id),
            shop_id: shop.to_string(),
            price: Decimal::from(price),
            vat_percent: Decimal::ZERO,
            weight_grams: 100,
            low_stock_threshold: 2,
            stock: StockCounters::new(quantity),
            has_variants: false,
            is_active: true,
        }
    }

    fn address(id: &str) -> Address {
        Address {
            id: id.to_string(),
            recipient: "Jane Roe".to_string(),
            line1: "1 Main St".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: "US".to_string(),
            phone: None,
        }
    }

    /// Two merchants, two shops, two products, one address
    fn seed_catalog(mgr: &SettlementManager) {
        for (merchant_id, shop_id, commission) in [("m1", "s1", 10), ("m2", "s2", 5)] {
            mgr.upsert_merchant(&Merchant {
                id: merchant_id.to_string(),
                name: format!("merchant {}", merchant_id),
                is_active: true,
            })
            .unwrap();
            mgr.upsert_shop(&Shop {
                id: shop_id.to_string(),
                name: format!("shop {}", shop_id),
                merchant_id: merchant_id.to_string(),
                commission_percent: Decimal::from(commission),
                is_active: true,
            })
            .unwrap();
        }
        mgr.upsert_product(product("p1", "s1", 100, 10)).unwrap();
        mgr.upsert_product(product("p2", "s2", 30, 10)).unwrap();
        mgr.upsert_address(&address("a1")).unwrap();
    }

    fn line(product_id: &str, quantity: u32) -> CartLineInput {
        CartLineInput {
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
        }
    }

    fn replace_cart(mgr: &SettlementManager, user_id: &str, lines: Vec<CartLineInput>) -> String {
        let response = mgr.execute_command(cmd(SettlementCommandPayload::ReplaceCart {
            user_id: user_id.to_string(),
            lines,
        }));
        assert!(response.success, "{:?}", response.error);
        response.entity_id.unwrap()
    }

    fn create_order(mgr: &SettlementManager, cart_id: &str) -> String {
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateOrder {
            cart_id: cart_id.to_string(),
            shipping_address_id: "a1".to_string(),
            billing_address_id: None,
            coupon_code: None,
            payment_method: PaymentMethod::Card,
        }));
        assert!(response.success, "{:?}", response.error);
        response.entity_id.unwrap()
    }

    fn set_order_status(mgr: &SettlementManager, order_id: &str, status: OrderStatus) {
        let response = mgr.execute_command(cmd(SettlementCommandPayload::UpdateOrderStatus {
            order_id: order_id.to_string(),
            status,
            payment_method: None,
        }));
        assert!(response.success, "{:?}", response.error);
    }

    fn deliver_order(mgr: &SettlementManager, order_id: &str) {
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            set_order_status(mgr, order_id, status);
        }
    }

    #[test]
    fn test_replace_cart() {
        let mgr = manager();
        seed_catalog(&mgr);

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 3)]);

        let cart = mgr.get_cart(&cart_id).unwrap().unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].unit_price, Decimal::from(100));
        assert!(cart.is_open());

        // reservation committed
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 3);
        assert_eq!(stock.quantity, 10);

        // open-cart index answers the query path
        let open = mgr.get_open_cart("u1").unwrap().unwrap();
        assert_eq!(open.id, cart_id);
    }

    #[test]
    fn test_replacing_cart_with_same_lines_keeps_reservation() {
        let mgr = manager();
        seed_catalog(&mgr);

        replace_cart(&mgr, "u1", vec![line("p1", 3)]);
        // a second distinct command with identical lines releases the
        // old reservation and takes it again, net zero
        replace_cart(&mgr, "u1", vec![line("p1", 3)]);

        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 3);
        assert_eq!(stock.quantity, 10);
    }

    #[test]
    fn test_duplicate_cart_lines_cannot_over_reserve() {
        let mgr = manager();
        seed_catalog(&mgr);

        // 6 + 6 of p1 against 10 on hand
        let response = mgr.execute_command(cmd(SettlementCommandPayload::ReplaceCart {
            user_id: "u1".to_string(),
            lines: vec![line("p1", 6), line("p1", 6)],
        }));

        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            CommandErrorCode::InsufficientStock
        );
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 0);
    }

    #[test]
    fn test_idempotency() {
        let mgr = manager();
        seed_catalog(&mgr);

        let command = cmd(SettlementCommandPayload::ReplaceCart {
            user_id: "u1".to_string(),
            lines: vec![line("p1", 3)],
        });

        let first = mgr.execute_command(command.clone());
        assert!(first.success);
        assert!(first.entity_id.is_some());

        let second = mgr.execute_command(command);
        assert!(second.success);
        assert!(second.entity_id.is_none());

        // the reservation was applied exactly once
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 3);
    }

    #[test]
    fn test_insufficient_stock_error_code() {
        let mgr = manager();
        seed_catalog(&mgr);

        let response = mgr.execute_command(cmd(SettlementCommandPayload::ReplaceCart {
            user_id: "u1".to_string(),
            lines: vec![line("p1", 99)],
        }));

        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.code, CommandErrorCode::InsufficientStock);
        assert!(error.message.contains("product p1"));

        // nothing persisted
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 0);
    }

    #[test]
    fn test_order_not_found_error_code() {
        let mgr = manager();
        let response = mgr.execute_command(cmd(SettlementCommandPayload::UpdateOrderStatus {
            order_id: "missing".to_string(),
            status: OrderStatus::Processing,
            payment_method: None,
        }));
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, CommandErrorCode::NotFound);
    }

    #[test]
    fn test_create_order_settles_across_shops() {
        let mgr = manager();
        seed_catalog(&mgr);

        // 2 x 100 from s1 plus 2 x 30 from s2
        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 2), line("p2", 2)]);
        let order_id = create_order(&mgr, &cart_id);

        let order = mgr.get_order(&order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));

        let invoice = mgr
            .get_customer_invoice(&order.invoice_id)
            .unwrap()
            .unwrap();
        assert_eq!(invoice.invoice_total, Decimal::from(260));
        assert_eq!(invoice.payable_total, Decimal::from(260));

        // shop invoices sum back to the customer total
        let shop_invoices = mgr.get_shop_invoices_for_order(&order_id).unwrap();
        assert_eq!(shop_invoices.len(), 2);
        let shop_sum: Decimal = shop_invoices.iter().map(|i| i.invoice_total).sum();
        assert_eq!(shop_sum, invoice.invoice_total);

        let s1 = shop_invoices.iter().find(|i| i.shop_id == "s1").unwrap();
        assert_eq!(s1.invoice_total, Decimal::from(200));
        assert_eq!(s1.commission, Decimal::from(20));
        let s2 = shop_invoices.iter().find(|i| i.shop_id == "s2").unwrap();
        assert_eq!(s2.invoice_total, Decimal::from(30 * 2));
        assert_eq!(s2.commission, Decimal::from(3));

        // each shop invoice hangs off a committed merchant invoice
        for shop_invoice in &shop_invoices {
            let merchant_invoice = mgr
                .get_merchant_invoice(&shop_invoice.merchant_invoice_id)
                .unwrap()
                .unwrap();
            assert_eq!(merchant_invoice.order_id, order_id);
        }

        // reservation converted to a sale
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 0);
        assert_eq!(stock.quantity, 8);
        assert_eq!(stock.sold, 2);

        // the cart is closed
        let cart = mgr.get_cart(&cart_id).unwrap().unwrap();
        assert!(!cart.is_open());
        assert_eq!(mgr.get_open_cart("u1").unwrap().map(|c| c.id), None);
    }

    #[test]
    fn test_coupon_discounts_payable_total() {
        let mgr = manager();
        seed_catalog(&mgr);
        mgr.upsert_coupon(&Coupon {
            code: "TEN".to_string(),
            kind: DiscountKind::Percent,
            value: Decimal::from(10),
            user_ids: vec![],
            is_active: true,
            expires_at: None,
        })
        .unwrap();

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 2)]);
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateOrder {
            cart_id,
            shipping_address_id: "a1".to_string(),
            billing_address_id: None,
            coupon_code: Some("TEN".to_string()),
            payment_method: PaymentMethod::Card,
        }));
        assert!(response.success, "{:?}", response.error);

        let order = mgr.get_order(&response.entity_id.unwrap()).unwrap().unwrap();
        let invoice = mgr
            .get_customer_invoice(&order.invoice_id)
            .unwrap()
            .unwrap();
        assert_eq!(invoice.invoice_total, Decimal::from(200));
        assert_eq!(invoice.coupon_discount, Decimal::from(20));
        assert_eq!(invoice.payable_total, Decimal::from(180));
    }

    #[test]
    fn test_event_broadcast_after_commit() {
        let mgr = manager();
        seed_catalog(&mgr);
        let mut rx = mgr.subscribe();

        replace_cart(&mgr, "u1", vec![line("p1", 1)]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, SettlementEventType::CartReplaced);
    }

    #[test]
    fn test_failed_command_broadcasts_nothing() {
        let mgr = manager();
        seed_catalog(&mgr);
        let mut rx = mgr.subscribe();

        let response = mgr.execute_command(cmd(SettlementCommandPayload::ReplaceCart {
            user_id: "u1".to_string(),
            lines: vec![],
        }));
        assert!(!response.success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sequence_monotonically_increasing() {
        let mgr = manager();
        seed_catalog(&mgr);

        replace_cart(&mgr, "u1", vec![line("p1", 1)]);
        replace_cart(&mgr, "u2", vec![line("p2", 1)]);
        let cart_id = replace_cart(&mgr, "u3", vec![line("p1", 1)]);
        create_order(&mgr, &cart_id);

        let events = mgr.get_events_since(0).unwrap();
        assert!(events.len() >= 4);
        for pair in events.windows(2) {
            assert!(pair[0].sequence < pair[1].sequence);
        }
        assert_eq!(
            mgr.get_current_sequence().unwrap(),
            events.last().unwrap().sequence
        );
    }

    #[test]
    fn test_refund_lifecycle_closes_and_hits_balance() {
        let mgr = manager();
        seed_catalog(&mgr);

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 2)]);
        let order_id = create_order(&mgr, &cart_id);
        deliver_order(&mgr, &order_id);

        let shop_invoices = mgr.get_shop_invoices_for_order(&order_id).unwrap();
        let shop_invoice_id = shop_invoices[0].id.clone();

        // customer returns one unit of p1
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateRefundRequest {
            order_id: order_id.clone(),
            lines: vec![RefundLineInput {
                shop_invoice_id,
                product_id: "p1".to_string(),
                variant_id: None,
                quantity: 1,
                reason: "damaged".to_string(),
            }],
        }));
        assert!(response.success, "{:?}", response.error);
        let request_id = response.entity_id.unwrap();
        let detail_id = mgr
            .get_refund_request(&request_id)
            .unwrap()
            .unwrap()
            .details[0]
            .id
            .clone();

        // pick then approve in full
        let response = mgr.execute_command(cmd(SettlementCommandPayload::UpdateRefundStatus {
            request_id: request_id.clone(),
            lines: vec![RefundAdjudicationInput {
                detail_id: detail_id.clone(),
                picked_quantity: Some(1),
                approved_quantity: None,
            }],
            target_status: RefundTargetStatus::Picked,
        }));
        assert!(response.success, "{:?}", response.error);
        let response = mgr.execute_command(cmd(SettlementCommandPayload::UpdateRefundStatus {
            request_id: request_id.clone(),
            lines: vec![RefundAdjudicationInput {
                detail_id,
                picked_quantity: None,
                approved_quantity: Some(1),
            }],
            target_status: RefundTargetStatus::Approved,
        }));
        assert!(response.success, "{:?}", response.error);

        // a fully approved request fans out a single shop bucket
        let approvals = mgr.get_approvals_for_request(&request_id).unwrap();
        assert_eq!(approvals.len(), 1);
        assert!(approvals[0].is_approved);
        assert_eq!(approvals[0].total_amount, Decimal::from(100));

        // approved unit back on the shelf
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.quantity, 9);
        assert_eq!(stock.sold, 1);

        // route the bucket and deliver it
        let response = mgr.execute_command(cmd(SettlementCommandPayload::AssignRefundShipment {
            request_id: request_id.clone(),
            approval_id: Some(approvals[0].id.clone()),
            transporter_id: "t-1".to_string(),
        }));
        assert!(response.success, "{:?}", response.error);
        let assignments = mgr.get_assignments_for_request(&request_id).unwrap();
        assert_eq!(assignments.len(), 1);
        for status in [ShipmentStatus::PickedUp, ShipmentStatus::Delivered] {
            let response =
                mgr.execute_command(cmd(SettlementCommandPayload::UpdateShipmentStatus {
                    assignment_id: assignments[0].id.clone(),
                    status,
                }));
            assert!(response.success, "{:?}", response.error);
        }

        let request = mgr.get_refund_request(&request_id).unwrap().unwrap();
        assert!(request.assign_status.is_terminal());

        // m1: net sale 200 - 20 commission, minus the closed 100 refund
        let balance = mgr.get_balance("m1").unwrap();
        assert_eq!(balance.total_sale, Decimal::from(180));
        assert_eq!(balance.total_refund, Decimal::from(100));
        assert_eq!(balance.available, Decimal::from(80));
    }

    #[test]
    fn test_refund_requires_delivered_order() {
        let mgr = manager();
        seed_catalog(&mgr);

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 1)]);
        let order_id = create_order(&mgr, &cart_id);
        let shop_invoices = mgr.get_shop_invoices_for_order(&order_id).unwrap();

        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateRefundRequest {
            order_id,
            lines: vec![RefundLineInput {
                shop_invoice_id: shop_invoices[0].id.clone(),
                product_id: "p1".to_string(),
                variant_id: None,
                quantity: 1,
                reason: "changed my mind".to_string(),
            }],
        }));
        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            CommandErrorCode::InvalidOperation
        );
    }

    #[test]
    fn test_withdrawal_against_available_balance() {
        let mgr = manager();
        seed_catalog(&mgr);

        // a delivered sale of 2 x 100 leaves m1 with 180 after commission
        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 2)]);
        let order_id = create_order(&mgr, &cart_id);
        deliver_order(&mgr, &order_id);
        assert_eq!(mgr.get_balance("m1").unwrap().available, Decimal::from(180));

        // below the configured minimum
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateWithdrawal {
            merchant_id: "m1".to_string(),
            amount: Decimal::from(100),
            bank_account_id: "acc-1".to_string(),
        }));
        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            CommandErrorCode::InsufficientBalance
        );

        // over the available balance
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateWithdrawal {
            merchant_id: "m1".to_string(),
            amount: Decimal::from(500),
            bank_account_id: "acc-1".to_string(),
        }));
        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            CommandErrorCode::InsufficientBalance
        );
    }

    #[test]
    fn test_withdrawal_pending_hold_and_approval() {
        let mgr = manager();
        seed_catalog(&mgr);

        // seed a large committed sale directly
        let txn = mgr.storage().begin_write().unwrap();
        mgr.storage()
            .put_shop_invoice(
                &txn,
                &ShopInvoice {
                    id: "si-seed".to_string(),
                    customer_invoice_id: "inv-seed".to_string(),
                    order_id: "ord-seed".to_string(),
                    shop_id: "s1".to_string(),
                    merchant_id: "m1".to_string(),
                    merchant_invoice_id: "mi-seed".to_string(),
                    payment_method: PaymentMethod::Card,
                    payment_status: PaymentStatus::Paid,
                    lines: vec![],
                    shipping_cost: Decimal::ZERO,
                    additional_shipping_cost: Decimal::ZERO,
                    invoice_total: Decimal::from(2000),
                    commission: Decimal::ZERO,
                    created_at: 0,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateWithdrawal {
            merchant_id: "m1".to_string(),
            amount: Decimal::from(800),
            bank_account_id: "acc-1".to_string(),
        }));
        assert!(response.success, "{:?}", response.error);
        let request_id = response.entity_id.unwrap();

        // the pending request holds its amount
        let balance = mgr.get_balance("m1").unwrap();
        assert_eq!(balance.total_pending_withdrawal, Decimal::from(800));
        assert_eq!(balance.available, Decimal::from(1200));

        let response =
            mgr.execute_command(cmd(SettlementCommandPayload::UpdateWithdrawalStatus {
                request_id: request_id.clone(),
                status: WithdrawalStatus::Approved,
                paid_amount: None,
            }));
        assert!(response.success, "{:?}", response.error);

        let withdrawal = mgr.get_withdrawal(&request_id).unwrap().unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Approved);
        assert_eq!(withdrawal.paid_amount, Some(Decimal::from(800)));

        let balance = mgr.get_balance("m1").unwrap();
        assert_eq!(balance.total_pending_withdrawal, Decimal::ZERO);
        assert_eq!(balance.total_withdrawal, Decimal::from(800));
        assert_eq!(balance.available, Decimal::from(1200));
    }

    #[test]
    fn test_pending_withdrawals_shrink_the_available_balance() {
        let mgr = manager();
        seed_catalog(&mgr);

        // committed sales worth 1000 and an existing 400 pending hold
        let txn = mgr.storage().begin_write().unwrap();
        mgr.storage()
            .put_shop_invoice(
                &txn,
                &ShopInvoice {
                    id: "si-seed".to_string(),
                    customer_invoice_id: "inv-seed".to_string(),
                    order_id: "ord-seed".to_string(),
                    shop_id: "s1".to_string(),
                    merchant_id: "m1".to_string(),
                    merchant_invoice_id: "mi-seed".to_string(),
                    payment_method: PaymentMethod::Card,
                    payment_status: PaymentStatus::Paid,
                    lines: vec![],
                    shipping_cost: Decimal::ZERO,
                    additional_shipping_cost: Decimal::ZERO,
                    invoice_total: Decimal::from(1000),
                    commission: Decimal::ZERO,
                    created_at: 0,
                },
            )
            .unwrap();
        mgr.storage()
            .put_withdrawal(
                &txn,
                &MerchantWithdrawalRequest {
                    id: "w-held".to_string(),
                    merchant_id: "m1".to_string(),
                    amount: Decimal::from(400),
                    paid_amount: None,
                    bank_account_id: "acc-1".to_string(),
                    status: WithdrawalStatus::Pending,
                    created_at: 0,
                    updated_at: 0,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        assert_eq!(mgr.get_balance("m1").unwrap().available, Decimal::from(600));

        // 700 exceeds the 600 still available
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateWithdrawal {
            merchant_id: "m1".to_string(),
            amount: Decimal::from(700),
            bank_account_id: "acc-1".to_string(),
        }));
        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            CommandErrorCode::InsufficientBalance
        );

        // 500 fits and joins the pending hold
        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateWithdrawal {
            merchant_id: "m1".to_string(),
            amount: Decimal::from(500),
            bank_account_id: "acc-1".to_string(),
        }));
        assert!(response.success, "{:?}", response.error);

        let balance = mgr.get_balance("m1").unwrap();
        assert_eq!(balance.total_pending_withdrawal, Decimal::from(900));
        assert_eq!(balance.available, Decimal::from(100));
    }

    #[test]
    fn test_cancellation_restocks() {
        let mgr = manager();
        seed_catalog(&mgr);

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 3)]);
        let order_id = create_order(&mgr, &cart_id);
        set_order_status(&mgr, &order_id, OrderStatus::Cancelled);

        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.quantity, 10);
        assert_eq!(stock.sold, 0);
    }

    #[test]
    fn test_state_survives_reopen() {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("settlement.redb");

        let cart_id = {
            let mgr = SettlementManager::new(&db_path, test_config()).unwrap();
            seed_catalog(&mgr);
            replace_cart(&mgr, "u1", vec![line("p1", 2)])
        };

        let mgr = SettlementManager::new(&db_path, test_config()).unwrap();
        let cart = mgr.get_cart(&cart_id).unwrap().unwrap();
        assert_eq!(cart.lines[0].quantity, 2);
        let stock = mgr.storage().get_product("p1").unwrap().unwrap().stock;
        assert_eq!(stock.reserved, 2);
    }

    #[test]
    fn test_upsert_product_applies_default_threshold() {
        let mgr = manager();
        let mut p = product("p9", "s1", 10, 10);
        p.low_stock_threshold = 0;
        mgr.upsert_product(p).unwrap();
        assert_eq!(
            mgr.storage()
                .get_product("p9")
                .unwrap()
                .unwrap()
                .low_stock_threshold,
            5
        );
    }

    #[test]
    fn test_admin_rejection_fans_out_single_bucket() {
        let mgr = manager();
        seed_catalog(&mgr);

        let cart_id = replace_cart(&mgr, "u1", vec![line("p1", 2)]);
        let order_id = create_order(&mgr, &cart_id);
        deliver_order(&mgr, &order_id);
        let shop_invoices = mgr.get_shop_invoices_for_order(&order_id).unwrap();

        let response = mgr.execute_command(cmd(SettlementCommandPayload::CreateRefundRequest {
            order_id,
            lines: vec![RefundLineInput {
                shop_invoice_id: shop_invoices[0].id.clone(),
                product_id: "p1".to_string(),
                variant_id: None,
                quantity: 2,
                reason: "damaged".to_string(),
            }],
        }));
        let request_id = response.entity_id.unwrap();

        let response = mgr.execute_command(cmd(SettlementCommandPayload::UpdateRefundStatus {
            request_id: request_id.clone(),
            lines: vec![],
            target_status: RefundTargetStatus::Rejected,
        }));
        assert!(response.success, "{:?}", response.error);

        let request = mgr.get_refund_request(&request_id).unwrap().unwrap();
        assert!(request.assign_status.is_terminal());
        assert!(
            request
                .details
                .iter()
                .all(|d| matches!(d.state, RefundLineState::Rejected { .. }))
        );

        // rejected requests never count against the balance
        let balance = mgr.get_balance("m1").unwrap();
        assert_eq!(balance.total_refund, Decimal::ZERO);
    }
}
