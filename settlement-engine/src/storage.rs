//! redb-based storage layer for the settlement engine
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `products` / `variants` | id | JSON | Catalog with stock counters |
//! | `shops` / `merchants` | id | JSON | Seller entities |
//! | `addresses` / `coupons` | id / code | JSON | Order-time lookups |
//! | `carts` | cart_id | JSON | Carts (open and closed) |
//! | `open_carts` | user_id | cart_id | Open-cart index |
//! | `orders` | order_id | JSON | Immutable orders |
//! | `customer_invoices` | invoice_id | JSON | One per order |
//! | `shop_invoices` / `merchant_invoices` | id | JSON | Settlement partitions |
//! | `order_shop_invoices` | (order_id, id) | `()` | Shop invoices per order |
//! | `merchant_shop_invoices` | (merchant_id, id) | `()` | Shop invoices per merchant |
//! | `refund_requests` | request_id | JSON | Refund aggregates |
//! | `merchant_refunds` | (merchant_id, request_id) | `()` | Refunds per merchant |
//! | `refund_approvals` | approval_id | JSON | Fan-out buckets |
//! | `request_approvals` | (request_id, approval_id) | `()` | Approvals per request |
//! | `assignments` | assignment_id | JSON | Refund shipments |
//! | `request_assignments` | (request_id, assignment_id) | `()` | Assignments per request |
//! | `withdrawals` | request_id | JSON | Withdrawal requests |
//! | `merchant_withdrawals` | (merchant_id, id) | `()` | Withdrawals per merchant |
//! | `events` | sequence | JSON | Append-only event outbox |
//! | `processed_commands` | command_id | `()` | Idempotency check |
//! | `counters` | name | u64 | Sequence / order number |
//! | `settings` | name | JSON | Shipping rate table |
//!
//! # Durability
//!
//! redb commits are persistent as soon as `commit()` returns; the file
//! is always in a consistent state, which is what makes the one-command
//! one-transaction discipline safe against partial failure.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::models::{
    Address, Cart, Coupon, CustomerInvoice, Merchant, MerchantInvoice,
    MerchantWithdrawalRequest, Order, Product, ProductVariant, RefundApproval, RefundRequest,
    RefundShipmentAssignment, ShippingRateTable, Shop, ShopInvoice,
};
use shared::settlement::SettlementEvent;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const PRODUCTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("products");
const VARIANTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("variants");
const SHOPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("shops");
const MERCHANTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("merchants");
const ADDRESSES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("addresses");
const COUPONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("coupons");
const CARTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("carts");
const OPEN_CARTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("open_carts");
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const CUSTOMER_INVOICES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("customer_invoices");
const SHOP_INVOICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("shop_invoices");
const MERCHANT_INVOICES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("merchant_invoices");
const ORDER_SHOP_INVOICES_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("order_shop_invoices");
const MERCHANT_SHOP_INVOICES_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("merchant_shop_invoices");
const REFUND_REQUESTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("refund_requests");
const MERCHANT_REFUNDS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("merchant_refunds");
const REFUND_APPROVALS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("refund_approvals");
const REQUEST_APPROVALS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("request_approvals");
const ASSIGNMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");
const REQUEST_ASSIGNMENTS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("request_assignments");
const WITHDRAWALS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("withdrawals");
const MERCHANT_WITHDRAWALS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("merchant_withdrawals");
const EVENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("events");
const PROCESSED_COMMANDS_TABLE: TableDefinition<&str, ()> =
    TableDefinition::new("processed_commands");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");
const SETTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

const SEQUENCE_KEY: &str = "seq";
const ORDER_COUNT_KEY: &str = "order_count";
const RATE_TABLE_KEY: &str = "rate_table";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found: {1}")]
    EntityNotFound(&'static str, String),

    #[error("Stock counter for {0} changed concurrently (expected version {1}, found {2})")]
    VersionConflict(String, u64, u64),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Settlement storage backed by redb
///
/// Every multi-entity write of the engine happens inside one write
/// transaction obtained from [`SettlementStorage::begin_write`]; the
/// read-path helpers open their own short-lived read transactions.
#[derive(Clone)]
pub struct SettlementStorage {
    db: Arc<Database>,
}

macro_rules! entity_accessors {
    ($get:ident, $get_txn:ident, $put:ident, $table:ident, $ty:ty) => {
        pub fn $get(&self, id: &str) -> StorageResult<Option<$ty>> {
            self.read_json($table, id)
        }

        pub fn $get_txn(&self, txn: &WriteTransaction, id: &str) -> StorageResult<Option<$ty>> {
            Self::txn_json(txn, $table, id)
        }

        pub fn $put(&self, txn: &WriteTransaction, value: &$ty) -> StorageResult<()> {
            Self::put_json(txn, $table, &value.id, value)
        }
    };
}

impl SettlementStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(PRODUCTS_TABLE)?;
            let _ = write_txn.open_table(VARIANTS_TABLE)?;
            let _ = write_txn.open_table(SHOPS_TABLE)?;
            let _ = write_txn.open_table(MERCHANTS_TABLE)?;
            let _ = write_txn.open_table(ADDRESSES_TABLE)?;
            let _ = write_txn.open_table(COUPONS_TABLE)?;
            let _ = write_txn.open_table(CARTS_TABLE)?;
            let _ = write_txn.open_table(OPEN_CARTS_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(CUSTOMER_INVOICES_TABLE)?;
            let _ = write_txn.open_table(SHOP_INVOICES_TABLE)?;
            let _ = write_txn.open_table(MERCHANT_INVOICES_TABLE)?;
            let _ = write_txn.open_table(ORDER_SHOP_INVOICES_TABLE)?;
            let _ = write_txn.open_table(MERCHANT_SHOP_INVOICES_TABLE)?;
            let _ = write_txn.open_table(REFUND_REQUESTS_TABLE)?;
            let _ = write_txn.open_table(MERCHANT_REFUNDS_TABLE)?;
            let _ = write_txn.open_table(REFUND_APPROVALS_TABLE)?;
            let _ = write_txn.open_table(REQUEST_APPROVALS_TABLE)?;
            let _ = write_txn.open_table(ASSIGNMENTS_TABLE)?;
            let _ = write_txn.open_table(REQUEST_ASSIGNMENTS_TABLE)?;
            let _ = write_txn.open_table(WITHDRAWALS_TABLE)?;
            let _ = write_txn.open_table(MERCHANT_WITHDRAWALS_TABLE)?;
            let _ = write_txn.open_table(EVENTS_TABLE)?;
            let _ = write_txn.open_table(PROCESSED_COMMANDS_TABLE)?;
            let _ = write_txn.open_table(SETTINGS_TABLE)?;

            let mut counters = write_txn.open_table(COUNTERS_TABLE)?;
            if counters.get(SEQUENCE_KEY)?.is_none() {
                counters.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Generic JSON helpers ==========

    fn put_json<T: Serialize>(
        txn: &WriteTransaction,
        table: TableDefinition<'_, &str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut t = txn.open_table(table)?;
        t.insert(key, bytes.as_slice())?;
        Ok(())
    }

    fn txn_json<T: DeserializeOwned>(
        txn: &WriteTransaction,
        table: TableDefinition<'_, &str, &[u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let t = txn.open_table(table)?;
        match t.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'_, &str, &[u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        match t.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Collect the child ids indexed under `parent` in a (parent, child)
    /// composite-key table
    fn read_index(
        &self,
        table: TableDefinition<'_, (&str, &str), ()>,
        parent: &str,
    ) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut ids = Vec::new();
        for result in t.range((parent, "")..)? {
            let (key, _) = result?;
            let (p, child) = key.value();
            if p != parent {
                break;
            }
            ids.push(child.to_string());
        }
        Ok(ids)
    }

    fn txn_index(
        txn: &WriteTransaction,
        table: TableDefinition<'_, (&str, &str), ()>,
        parent: &str,
    ) -> StorageResult<Vec<String>> {
        let t = txn.open_table(table)?;
        let mut ids = Vec::new();
        for result in t.range((parent, "")..)? {
            let (key, _) = result?;
            let (p, child) = key.value();
            if p != parent {
                break;
            }
            ids.push(child.to_string());
        }
        Ok(ids)
    }

    fn insert_index(
        txn: &WriteTransaction,
        table: TableDefinition<'_, (&str, &str), ()>,
        parent: &str,
        child: &str,
    ) -> StorageResult<()> {
        let mut t = txn.open_table(table)?;
        t.insert((parent, child), ())?;
        Ok(())
    }

    // ========== Catalog entities ==========

    entity_accessors!(get_product, get_product_txn, put_product_unchecked, PRODUCTS_TABLE, Product);
    entity_accessors!(get_variant, get_variant_txn, put_variant_unchecked, VARIANTS_TABLE, ProductVariant);
    entity_accessors!(get_shop, get_shop_txn, put_shop, SHOPS_TABLE, Shop);
    entity_accessors!(get_merchant, get_merchant_txn, put_merchant, MERCHANTS_TABLE, Merchant);
    entity_accessors!(get_address, get_address_txn, put_address, ADDRESSES_TABLE, Address);

    pub fn get_coupon(&self, code: &str) -> StorageResult<Option<Coupon>> {
        self.read_json(COUPONS_TABLE, code)
    }

    pub fn get_coupon_txn(&self, txn: &WriteTransaction, code: &str) -> StorageResult<Option<Coupon>> {
        Self::txn_json(txn, COUPONS_TABLE, code)
    }

    pub fn put_coupon(&self, txn: &WriteTransaction, coupon: &Coupon) -> StorageResult<()> {
        Self::put_json(txn, COUPONS_TABLE, &coupon.code, coupon)
    }

    /// Persist a product, verifying its stock-counter version
    ///
    /// `expected_version` is the version observed when the command first
    /// loaded the product; a mismatch means another writer got in
    /// between and the whole command must be retried.
    pub fn put_product_guarded(
        &self,
        txn: &WriteTransaction,
        product: &Product,
        expected_version: u64,
    ) -> StorageResult<()> {
        if let Some(current) = Self::txn_json::<Product>(txn, PRODUCTS_TABLE, &product.id)? {
            if current.stock.version != expected_version {
                return Err(StorageError::VersionConflict(
                    product.id.clone(),
                    expected_version,
                    current.stock.version,
                ));
            }
        }
        self.put_product_unchecked(txn, product)
    }

    /// Persist a variant, verifying its stock-counter version
    pub fn put_variant_guarded(
        &self,
        txn: &WriteTransaction,
        variant: &ProductVariant,
        expected_version: u64,
    ) -> StorageResult<()> {
        if let Some(current) = Self::txn_json::<ProductVariant>(txn, VARIANTS_TABLE, &variant.id)? {
            if current.stock.version != expected_version {
                return Err(StorageError::VersionConflict(
                    variant.id.clone(),
                    expected_version,
                    current.stock.version,
                ));
            }
        }
        self.put_variant_unchecked(txn, variant)
    }

    // ========== Carts ==========

    entity_accessors!(get_cart, get_cart_txn, put_cart, CARTS_TABLE, Cart);

    pub fn get_open_cart_id(&self, user_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(OPEN_CARTS_TABLE)?;
        Ok(t.get(user_id)?.map(|g| g.value().to_string()))
    }

    pub fn get_open_cart_id_txn(
        &self,
        txn: &WriteTransaction,
        user_id: &str,
    ) -> StorageResult<Option<String>> {
        let t = txn.open_table(OPEN_CARTS_TABLE)?;
        Ok(t.get(user_id)?.map(|g| g.value().to_string()))
    }

    pub fn set_open_cart(
        &self,
        txn: &WriteTransaction,
        user_id: &str,
        cart_id: &str,
    ) -> StorageResult<()> {
        let mut t = txn.open_table(OPEN_CARTS_TABLE)?;
        t.insert(user_id, cart_id)?;
        Ok(())
    }

    pub fn clear_open_cart(&self, txn: &WriteTransaction, user_id: &str) -> StorageResult<()> {
        let mut t = txn.open_table(OPEN_CARTS_TABLE)?;
        t.remove(user_id)?;
        Ok(())
    }

    // ========== Orders and invoices ==========

    entity_accessors!(get_order, get_order_txn, put_order, ORDERS_TABLE, Order);
    entity_accessors!(
        get_customer_invoice,
        get_customer_invoice_txn,
        put_customer_invoice,
        CUSTOMER_INVOICES_TABLE,
        CustomerInvoice);
    entity_accessors!(
        get_shop_invoice,
        get_shop_invoice_txn,
        put_shop_invoice_row,
        SHOP_INVOICES_TABLE,
        ShopInvoice);
    entity_accessors!(
        get_merchant_invoice,
        get_merchant_invoice_txn,
        put_merchant_invoice,
        MERCHANT_INVOICES_TABLE,
        MerchantInvoice);

    /// Persist a shop invoice and keep its per-order and per-merchant
    /// indices in step
    pub fn put_shop_invoice(&self, txn: &WriteTransaction, invoice: &ShopInvoice) -> StorageResult<()> {
        self.put_shop_invoice_row(txn, invoice)?;
        Self::insert_index(txn, ORDER_SHOP_INVOICES_TABLE, &invoice.order_id, &invoice.id)?;
        Self::insert_index(
            txn,
            MERCHANT_SHOP_INVOICES_TABLE,
            &invoice.merchant_id,
            &invoice.id,
        )
    }

    pub fn shop_invoice_ids_for_order(&self, order_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(ORDER_SHOP_INVOICES_TABLE, order_id)
    }

    pub fn shop_invoice_ids_for_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, ORDER_SHOP_INVOICES_TABLE, order_id)
    }

    pub fn shop_invoice_ids_for_merchant(&self, merchant_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(MERCHANT_SHOP_INVOICES_TABLE, merchant_id)
    }

    pub fn shop_invoice_ids_for_merchant_txn(
        &self,
        txn: &WriteTransaction,
        merchant_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, MERCHANT_SHOP_INVOICES_TABLE, merchant_id)
    }

    // ========== Refund workflow ==========

    entity_accessors!(
        get_refund_request,
        get_refund_request_txn,
        put_refund_request_row,
        REFUND_REQUESTS_TABLE,
        RefundRequest);
    entity_accessors!(
        get_refund_approval,
        get_refund_approval_txn,
        put_refund_approval_row,
        REFUND_APPROVALS_TABLE,
        RefundApproval);
    entity_accessors!(
        get_assignment,
        get_assignment_txn,
        put_assignment_row,
        ASSIGNMENTS_TABLE,
        RefundShipmentAssignment);

    /// Persist a refund request and index it under every merchant whose
    /// shop appears in its details
    pub fn put_refund_request(
        &self,
        txn: &WriteTransaction,
        request: &RefundRequest,
    ) -> StorageResult<()> {
        self.put_refund_request_row(txn, request)?;
        for detail in &request.details {
            Self::insert_index(txn, MERCHANT_REFUNDS_TABLE, &detail.merchant_id, &request.id)?;
        }
        Ok(())
    }

    pub fn put_refund_approval(
        &self,
        txn: &WriteTransaction,
        approval: &RefundApproval,
    ) -> StorageResult<()> {
        self.put_refund_approval_row(txn, approval)?;
        Self::insert_index(txn, REQUEST_APPROVALS_TABLE, &approval.request_id, &approval.id)
    }

    pub fn put_assignment(
        &self,
        txn: &WriteTransaction,
        assignment: &RefundShipmentAssignment,
    ) -> StorageResult<()> {
        self.put_assignment_row(txn, assignment)?;
        Self::insert_index(
            txn,
            REQUEST_ASSIGNMENTS_TABLE,
            &assignment.request_id,
            &assignment.id,
        )
    }

    pub fn refund_ids_for_merchant(&self, merchant_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(MERCHANT_REFUNDS_TABLE, merchant_id)
    }

    pub fn refund_ids_for_merchant_txn(
        &self,
        txn: &WriteTransaction,
        merchant_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, MERCHANT_REFUNDS_TABLE, merchant_id)
    }

    pub fn approval_ids_for_request(&self, request_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(REQUEST_APPROVALS_TABLE, request_id)
    }

    pub fn approval_ids_for_request_txn(
        &self,
        txn: &WriteTransaction,
        request_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, REQUEST_APPROVALS_TABLE, request_id)
    }

    pub fn assignment_ids_for_request(&self, request_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(REQUEST_ASSIGNMENTS_TABLE, request_id)
    }

    pub fn assignment_ids_for_request_txn(
        &self,
        txn: &WriteTransaction,
        request_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, REQUEST_ASSIGNMENTS_TABLE, request_id)
    }

    // ========== Withdrawals ==========

    entity_accessors!(
        get_withdrawal,
        get_withdrawal_txn,
        put_withdrawal_row,
        WITHDRAWALS_TABLE,
        MerchantWithdrawalRequest);

    pub fn put_withdrawal(
        &self,
        txn: &WriteTransaction,
        withdrawal: &MerchantWithdrawalRequest,
    ) -> StorageResult<()> {
        self.put_withdrawal_row(txn, withdrawal)?;
        Self::insert_index(
            txn,
            MERCHANT_WITHDRAWALS_TABLE,
            &withdrawal.merchant_id,
            &withdrawal.id,
        )
    }

    pub fn withdrawal_ids_for_merchant(&self, merchant_id: &str) -> StorageResult<Vec<String>> {
        self.read_index(MERCHANT_WITHDRAWALS_TABLE, merchant_id)
    }

    pub fn withdrawal_ids_for_merchant_txn(
        &self,
        txn: &WriteTransaction,
        merchant_id: &str,
    ) -> StorageResult<Vec<String>> {
        Self::txn_index(txn, MERCHANT_WITHDRAWALS_TABLE, merchant_id)
    }

    // ========== Rate table ==========

    pub fn get_rate_table(&self) -> StorageResult<Option<ShippingRateTable>> {
        self.read_json(SETTINGS_TABLE, RATE_TABLE_KEY)
    }

    pub fn get_rate_table_txn(
        &self,
        txn: &WriteTransaction,
    ) -> StorageResult<Option<ShippingRateTable>> {
        Self::txn_json(txn, SETTINGS_TABLE, RATE_TABLE_KEY)
    }

    pub fn put_rate_table(
        &self,
        txn: &WriteTransaction,
        table: &ShippingRateTable,
    ) -> StorageResult<()> {
        Self::put_json(txn, SETTINGS_TABLE, RATE_TABLE_KEY, table)
    }

    // ========== Events ==========

    pub fn store_event(&self, txn: &WriteTransaction, event: &SettlementEvent) -> StorageResult<()> {
        let bytes = serde_json::to_vec(event)?;
        let mut t = txn.open_table(EVENTS_TABLE)?;
        t.insert(event.sequence, bytes.as_slice())?;
        Ok(())
    }

    /// Events with a sequence strictly greater than `since_sequence`
    pub fn get_events_since(&self, since_sequence: u64) -> StorageResult<Vec<SettlementEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS_TABLE)?;
        let mut events = Vec::new();
        for result in table.range(since_sequence + 1..)? {
            let (_key, value) = result?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }

    // ========== Sequence and counters ==========

    /// Get current sequence (read-only)
    pub fn get_current_sequence(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERS_TABLE)?;
        Ok(table.get(SEQUENCE_KEY)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Set sequence number (within transaction)
    pub fn set_sequence(&self, txn: &WriteTransaction, sequence: u64) -> StorageResult<()> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        table.insert(SEQUENCE_KEY, sequence)?;
        Ok(())
    }

    /// Get and increment the order counter atomically (own transaction)
    ///
    /// Pre-generated outside the command transaction so a failed command
    /// wastes at most one number; redb does not allow nested writes.
    pub fn next_order_count(&self) -> StorageResult<u64> {
        let txn = self.db.begin_write()?;
        let next = {
            let mut table = txn.open_table(COUNTERS_TABLE)?;
            let current = table.get(ORDER_COUNT_KEY)?.map(|g| g.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(ORDER_COUNT_KEY, next)?;
            next
        };
        txn.commit()?;
        Ok(next)
    }

    // ========== Idempotency ==========

    pub fn is_command_processed(&self, command_id: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        Ok(table.get(command_id)?.is_some())
    }

    pub fn is_command_processed_txn(
        &self,
        txn: &WriteTransaction,
        command_id: &str,
    ) -> StorageResult<bool> {
        let table = txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        Ok(table.get(command_id)?.is_some())
    }

    pub fn mark_command_processed(
        &self,
        txn: &WriteTransaction,
        command_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        table.insert(command_id, ())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::StockCounters;

    fn product(id: &str, version: u64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            shop_id: "shop-1".to_string(),
            price: Decimal::from(10),
            vat_percent: Decimal::ZERO,
            weight_grams: 100,
            low_stock_threshold: 2,
            stock: StockCounters {
                quantity: 10,
                reserved: 0,
                sold: 0,
                version,
            },
            has_variants: false,
            is_active: true,
        }
    }

    #[test]
    fn round_trips_a_product() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_product_unchecked(&txn, &product("p1", 0)).unwrap();
        txn.commit().unwrap();

        let loaded = storage.get_product("p1").unwrap().unwrap();
        assert_eq!(loaded.name, "Product p1");
        assert!(storage.get_product("missing").unwrap().is_none());
    }

    #[test]
    fn guarded_put_detects_version_conflict() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_product_unchecked(&txn, &product("p1", 3)).unwrap();
        txn.commit().unwrap();

        // A writer that loaded version 2 must not clobber version 3
        let txn = storage.begin_write().unwrap();
        let stale = product("p1", 4);
        let err = storage.put_product_guarded(&txn, &stale, 2).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict(_, 2, 3)));
        txn.abort().unwrap();

        // Matching expectation goes through
        let txn = storage.begin_write().unwrap();
        storage.put_product_guarded(&txn, &product("p1", 4), 3).unwrap();
        txn.commit().unwrap();
        assert_eq!(storage.get_product("p1").unwrap().unwrap().stock.version, 4);
    }

    #[test]
    fn index_scan_is_prefix_bounded() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        SettlementStorage::insert_index(&txn, MERCHANT_REFUNDS_TABLE, "m1", "r1").unwrap();
        SettlementStorage::insert_index(&txn, MERCHANT_REFUNDS_TABLE, "m1", "r2").unwrap();
        SettlementStorage::insert_index(&txn, MERCHANT_REFUNDS_TABLE, "m2", "r3").unwrap();
        txn.commit().unwrap();

        let ids = storage.refund_ids_for_merchant("m1").unwrap();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(storage.refund_ids_for_merchant("m3").unwrap().len(), 0);
    }

    #[test]
    fn processed_commands_are_remembered() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        assert!(!storage.is_command_processed("cmd-1").unwrap());

        let txn = storage.begin_write().unwrap();
        storage.mark_command_processed(&txn, "cmd-1").unwrap();
        txn.commit().unwrap();

        assert!(storage.is_command_processed("cmd-1").unwrap());
    }

    #[test]
    fn order_counter_increments_across_calls() {
        let storage = SettlementStorage::open_in_memory().unwrap();
        assert_eq!(storage.next_order_count().unwrap(), 1);
        assert_eq!(storage.next_order_count().unwrap(), 2);
    }
}
