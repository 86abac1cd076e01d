//! In-process ledger store.
//!
//! Used for tests and for running a service without PostgreSQL
//! (`database.url = "memory://"`). All tables sit behind one lock, so
//! [`LedgerStore::apply`] validates every precondition before writing
//! anything.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use shared::{Batch, Indent, IndentStatus, InventoryTransaction, Item};
use tokio::sync::RwLock;

use super::{
    AppliedChange, BatchRef, IndentTransition, LedgerChange, LedgerStore, NewIndent, NewItem,
    StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<i64, Item>,
    batches: BTreeMap<i64, Batch>,
    transactions: Vec<InventoryTransaction>,
    indents: BTreeMap<i64, Indent>,
    next_item_id: i64,
    next_batch_id: i64,
    next_transaction_id: i64,
    next_indent_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    /// Live names are unique, as the `idx_items_live_name` index enforces
    fn ensure_name_free(&self, name: &str, except: Option<i64>) -> StoreResult<()> {
        let taken = self
            .items
            .values()
            .any(|i| !i.is_deleted() && i.name == name && Some(i.id) != except);
        if taken {
            return Err(StoreError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn live_batch(&self, id: i64) -> Option<&Batch> {
        self.batches.get(&id).filter(|b| !b.is_deleted())
    }

    fn check_transition(&self, transition: &IndentTransition) -> StoreResult<()> {
        match self.indents.get(&transition.indent_id) {
            Some(indent) if indent.status == transition.from => Ok(()),
            Some(_) => Err(StoreError::StatusChanged {
                indent_id: transition.indent_id,
            }),
            None => Err(StoreError::NotFound {
                entity: "indent",
                id: transition.indent_id,
            }),
        }
    }

    fn write_transition(&mut self, transition: IndentTransition) -> Option<Indent> {
        let indent = self.indents.get_mut(&transition.indent_id)?;
        indent.status = transition.to;
        if let Some(details) = transition.dispatch_details {
            indent.dispatch_details = details;
        }
        indent.updated_at = Utc::now();
        Some(indent.clone())
    }
}

/// Ledger store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_item(&self, item: NewItem) -> StoreResult<Item> {
        let mut tables = self.tables.write().await;
        tables.ensure_name_free(&item.name, None)?;
        let now = Utc::now();
        let id = Tables::next_id(&mut tables.next_item_id);
        let item = Item {
            id,
            name: item.name,
            description: item.description,
            threshold: item.threshold,
            unit: item.unit,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.items.insert(id, item.clone());
        Ok(item)
    }

    async fn get_item(&self, id: i64) -> StoreResult<Option<Item>> {
        Ok(self.tables.read().await.items.get(&id).cloned())
    }

    async fn find_items_by_name(&self, name: &str) -> StoreResult<Vec<Item>> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .values()
            .filter(|i| !i.is_deleted() && i.name == name)
            .cloned()
            .collect())
    }

    async fn list_items(&self) -> StoreResult<Vec<Item>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Item> = tables
            .items
            .values()
            .filter(|i| !i.is_deleted())
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_item(&self, item: &Item) -> StoreResult<Item> {
        let mut tables = self.tables.write().await;
        tables.ensure_name_free(&item.name, Some(item.id))?;
        let stored = tables
            .items
            .get_mut(&item.id)
            .filter(|i| !i.is_deleted())
            .ok_or(StoreError::NotFound {
                entity: "item",
                id: item.id,
            })?;
        stored.name = item.name.clone();
        stored.description = item.description.clone();
        stored.threshold = item.threshold;
        stored.unit = item.unit.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn tombstone_item(&self, id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .items
            .get_mut(&id)
            .filter(|i| !i.is_deleted())
            .ok_or(StoreError::NotFound { entity: "item", id })?;
        let now = Utc::now();
        stored.deleted_at = Some(now);
        stored.updated_at = now;
        Ok(())
    }

    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>> {
        Ok(self.tables.read().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self, item_id: i64) -> StoreResult<Vec<Batch>> {
        let tables = self.tables.read().await;
        let mut batches: Vec<Batch> = tables
            .batches
            .values()
            .filter(|b| b.item_id == item_id && !b.is_deleted())
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then(a.id.cmp(&b.id)));
        Ok(batches)
    }

    async fn update_batch_metadata(&self, batch: &Batch) -> StoreResult<Batch> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .batches
            .get_mut(&batch.id)
            .filter(|b| !b.is_deleted())
            .ok_or(StoreError::NotFound {
                entity: "batch",
                id: batch.id,
            })?;
        stored.batch_number = batch.batch_number.clone();
        stored.expiry_date = batch.expiry_date;
        stored.mrp = batch.mrp;
        stored.location = batch.location.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_quantity_if_unchanged(
        &self,
        batch_id: i64,
        expected: i64,
        new_quantity: i64,
    ) -> StoreResult<bool> {
        if new_quantity < 0 {
            return Ok(false);
        }
        let mut tables = self.tables.write().await;
        match tables.batches.get_mut(&batch_id) {
            Some(batch) if !batch.is_deleted() && batch.quantity == expected => {
                batch.quantity = new_quantity;
                batch.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_transactions(&self, limit: u32) -> StoreResult<Vec<InventoryTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn item_transactions(&self, item_id: i64) -> StoreResult<Vec<InventoryTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn reference_transactions(
        &self,
        reference_id: &str,
    ) -> StoreResult<Vec<InventoryTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.reference_id == reference_id)
            .cloned()
            .collect())
    }

    async fn insert_indent(&self, indent: NewIndent) -> StoreResult<Indent> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let id = Tables::next_id(&mut tables.next_indent_id);
        let indent = Indent {
            id,
            item_name: indent.item_name,
            quantity: indent.quantity,
            status: IndentStatus::Pending,
            pharmacy_id: indent.pharmacy_id,
            dispatch_details: String::new(),
            created_at: now,
            updated_at: now,
        };
        tables.indents.insert(id, indent.clone());
        Ok(indent)
    }

    async fn get_indent(&self, id: i64) -> StoreResult<Option<Indent>> {
        Ok(self.tables.read().await.indents.get(&id).cloned())
    }

    async fn list_indents(&self) -> StoreResult<Vec<Indent>> {
        let tables = self.tables.read().await;
        Ok(tables.indents.values().rev().cloned().collect())
    }

    async fn transition_indent(
        &self,
        transition: IndentTransition,
    ) -> StoreResult<Option<Indent>> {
        let mut tables = self.tables.write().await;
        match tables.check_transition(&transition) {
            Ok(()) => Ok(tables.write_transition(transition)),
            Err(StoreError::StatusChanged { .. }) | Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, change: LedgerChange) -> StoreResult<AppliedChange> {
        let mut tables = self.tables.write().await;

        // Validate everything up front; nothing below may fail
        if let Some(transition) = &change.indent {
            tables
                .check_transition(transition)
                .map_err(|_| StoreError::StatusChanged {
                    indent_id: transition.indent_id,
                })?;
        }
        if let Some(guard) = &change.receipt {
            let received = tables
                .batches
                .values()
                .filter(|b| {
                    b.item_id == guard.item_id
                        && b.source_reference.as_deref() == Some(guard.reference.as_str())
                })
                .count() as i64;
            if received != guard.expected {
                return Err(StoreError::ReceiptChanged {
                    reference: guard.reference.clone(),
                });
            }
        }
        for adjustment in &change.adjustments {
            let current = tables.live_batch(adjustment.batch_id).map(|b| b.quantity);
            if current != Some(adjustment.expected) || adjustment.new_quantity < 0 {
                return Err(StoreError::StaleBatch {
                    batch_id: adjustment.batch_id,
                });
            }
        }
        for tombstone in &change.tombstones {
            let current = tables.live_batch(tombstone.batch_id).map(|b| b.quantity);
            if current != Some(tombstone.expected) {
                return Err(StoreError::StaleBatch {
                    batch_id: tombstone.batch_id,
                });
            }
        }
        for batch in &change.new_batches {
            if !tables.items.contains_key(&batch.item_id) {
                return Err(StoreError::NotFound {
                    entity: "item",
                    id: batch.item_id,
                });
            }
        }
        for entry in &change.transactions {
            match entry.batch {
                BatchRef::Created(index) if index >= change.new_batches.len() => {
                    return Err(StoreError::Corrupt(format!(
                        "ledger row references new batch #{}",
                        index
                    )));
                }
                BatchRef::Existing(id) if !tables.batches.contains_key(&id) => {
                    return Err(StoreError::NotFound { entity: "batch", id });
                }
                _ => {}
            }
            if !tables.items.contains_key(&entry.item_id) {
                return Err(StoreError::NotFound {
                    entity: "item",
                    id: entry.item_id,
                });
            }
        }

        let now = Utc::now();
        let mut applied = AppliedChange::default();

        if let Some(transition) = change.indent {
            applied.indent = tables.write_transition(transition);
        }

        for adjustment in &change.adjustments {
            if let Some(batch) = tables.batches.get_mut(&adjustment.batch_id) {
                batch.quantity = adjustment.new_quantity;
                batch.updated_at = now;
                applied.batches.push(batch.clone());
            }
        }

        for tombstone in &change.tombstones {
            if let Some(batch) = tables.batches.get_mut(&tombstone.batch_id) {
                batch.deleted_at = Some(now);
                batch.updated_at = now;
                applied.batches.push(batch.clone());
            }
        }

        let mut created = Vec::with_capacity(change.new_batches.len());
        for batch in change.new_batches {
            let id = Tables::next_id(&mut tables.next_batch_id);
            let batch = Batch {
                id,
                item_id: batch.item_id,
                batch_number: batch.batch_number,
                quantity: batch.quantity,
                expiry_date: batch.expiry_date,
                mrp: batch.mrp,
                location: batch.location,
                source_reference: batch.source_reference,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            tables.batches.insert(id, batch.clone());
            created.push(id);
            applied.batches.push(batch);
        }

        for entry in change.transactions {
            let batch_id = match entry.batch {
                BatchRef::None => None,
                BatchRef::Existing(id) => Some(id),
                BatchRef::Created(index) => created.get(index).copied(),
            };
            let id = Tables::next_id(&mut tables.next_transaction_id);
            let row = InventoryTransaction {
                id,
                item_id: entry.item_id,
                batch_id,
                quantity_change: entry.quantity_change,
                reason: entry.reason,
                reference_id: entry.reference_id,
                performed_by: entry.performed_by,
                notes: entry.notes,
                timestamp: now,
            };
            tables.transactions.push(row.clone());
            applied.transactions.push(row);
        }

        Ok(applied)
    }
}
