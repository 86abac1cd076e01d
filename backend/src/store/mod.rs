//! Ledger store: durable keyed storage for items, batches, the append-only
//! transaction ledger and indents.
//!
//! No business logic lives here. The one non-trivial operation is
//! [`LedgerStore::apply`], which commits a [`LedgerChange`] all-or-nothing.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{Batch, Indent, IndentStatus, InventoryTransaction, Item, ReasonCode};
use thiserror::Error;

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Optimistic check failed: the batch no longer holds the expected
    /// quantity, or the adjustment would drive it negative
    #[error("batch {batch_id} changed since it was read")]
    StaleBatch { batch_id: i64 },

    /// The indent is no longer in the status the change expected
    #[error("indent {indent_id} status changed since it was read")]
    StatusChanged { indent_id: i64 },

    /// A live item already carries this name
    #[error("item name {name:?} is taken")]
    DuplicateName { name: String },

    /// Another receipt under the same reference committed first
    #[error("batches received under {reference} changed since they were counted")]
    ReceiptChanged { reference: String },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Item to insert
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub description: String,
    pub threshold: i64,
    pub unit: String,
}

/// Batch to insert
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub item_id: i64,
    pub batch_number: String,
    pub quantity: i64,
    pub expiry_date: DateTime<Utc>,
    pub mrp: Option<Decimal>,
    pub location: String,
    pub source_reference: Option<String>,
}

/// Indent to insert (always PENDING)
#[derive(Debug, Clone)]
pub struct NewIndent {
    pub item_name: String,
    pub quantity: i64,
    pub pharmacy_id: String,
}

/// Batch a ledger row points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRef {
    /// Item-level row
    None,
    Existing(i64),
    /// Index into [`LedgerChange::new_batches`]
    Created(usize),
}

/// Ledger row to append
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub item_id: i64,
    pub batch: BatchRef,
    pub quantity_change: i64,
    pub reason: ReasonCode,
    pub reference_id: String,
    pub performed_by: String,
    pub notes: String,
}

/// Compare-and-set on a batch quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityAdjustment {
    pub batch_id: i64,
    /// Quantity observed when the change was planned
    pub expected: i64,
    /// Quantity to store; must be >= 0
    pub new_quantity: i64,
}

impl QuantityAdjustment {
    pub fn delta(&self) -> i64 {
        self.new_quantity - self.expected
    }
}

/// Logical delete of a batch whose quantity must still be `expected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTombstone {
    pub batch_id: i64,
    pub expected: i64,
}

/// Conditional indent status move applied inside the same unit of work
#[derive(Debug, Clone)]
pub struct IndentTransition {
    pub indent_id: i64,
    pub from: IndentStatus,
    pub to: IndentStatus,
    /// `Some` replaces `dispatch_details`
    pub dispatch_details: Option<String>,
}

/// Receipt precondition: the item must still hold exactly `expected`
/// batches (tombstoned included) tagged with `reference`.
///
/// Concurrent receipts under one reference are serialized by the store,
/// so only the first of two overlapping attempts can pass the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptGuard {
    pub item_id: i64,
    pub reference: String,
    pub expected: i64,
}

/// A set of writes committed atomically by [`LedgerStore::apply`]
#[derive(Debug, Clone, Default)]
pub struct LedgerChange {
    pub new_batches: Vec<NewBatch>,
    pub adjustments: Vec<QuantityAdjustment>,
    pub tombstones: Vec<BatchTombstone>,
    pub transactions: Vec<NewTransaction>,
    pub indent: Option<IndentTransition>,
    pub receipt: Option<ReceiptGuard>,
}

impl LedgerChange {
    pub fn is_empty(&self) -> bool {
        self.new_batches.is_empty()
            && self.adjustments.is_empty()
            && self.tombstones.is_empty()
            && self.transactions.is_empty()
            && self.indent.is_none()
            && self.receipt.is_none()
    }
}

/// What [`LedgerStore::apply`] wrote
#[derive(Debug, Clone, Default)]
pub struct AppliedChange {
    pub batches: Vec<Batch>,
    pub transactions: Vec<InventoryTransaction>,
    pub indent: Option<Indent>,
}

/// Durable storage consumed by the stock services
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // Items
    async fn insert_item(&self, item: NewItem) -> StoreResult<Item>;
    /// Includes tombstoned items so history stays resolvable
    async fn get_item(&self, id: i64) -> StoreResult<Option<Item>>;
    /// Live items whose name matches exactly (case-sensitive)
    async fn find_items_by_name(&self, name: &str) -> StoreResult<Vec<Item>>;
    async fn list_items(&self) -> StoreResult<Vec<Item>>;
    /// Metadata only
    async fn update_item(&self, item: &Item) -> StoreResult<Item>;
    async fn tombstone_item(&self, id: i64) -> StoreResult<()>;

    // Batches
    /// Includes tombstoned batches
    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>>;
    /// Live batches ordered by expiry ascending, then id
    async fn list_batches(&self, item_id: i64) -> StoreResult<Vec<Batch>>;
    /// Metadata only; quantity is left untouched
    async fn update_batch_metadata(&self, batch: &Batch) -> StoreResult<Batch>;
    /// Set quantity only if it still equals `expected`
    async fn update_quantity_if_unchanged(
        &self,
        batch_id: i64,
        expected: i64,
        new_quantity: i64,
    ) -> StoreResult<bool>;

    // Ledger
    /// Newest first
    async fn list_transactions(&self, limit: u32) -> StoreResult<Vec<InventoryTransaction>>;
    /// Oldest first
    async fn item_transactions(&self, item_id: i64) -> StoreResult<Vec<InventoryTransaction>>;
    /// Oldest first
    async fn reference_transactions(
        &self,
        reference_id: &str,
    ) -> StoreResult<Vec<InventoryTransaction>>;

    // Indents
    async fn insert_indent(&self, indent: NewIndent) -> StoreResult<Indent>;
    async fn get_indent(&self, id: i64) -> StoreResult<Option<Indent>>;
    /// Newest first
    async fn list_indents(&self) -> StoreResult<Vec<Indent>>;
    /// Move status only if it is still `from`; `Ok(None)` when it was not
    async fn transition_indent(&self, transition: IndentTransition)
        -> StoreResult<Option<Indent>>;

    /// Commit a change all-or-nothing
    async fn apply(&self, change: LedgerChange) -> StoreResult<AppliedChange>;
}
