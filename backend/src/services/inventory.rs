//! Inventory service: items, batches, the audit log and stock reports

use std::sync::Arc;

use chrono::Utc;
use shared::{
    ledger_total, normalize_item_name, parse_iso_date, total_quantity, validate_batch_number,
    Batch, BatchDetailsInput, CreateBatchInput, CreateItemInput, DashboardStats,
    InventoryTransaction, Item, ItemReconciliation, ItemWithStock, ReasonCode, UpdateBatchInput,
    UpdateItemInput,
};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::stock::{Attribution, StockService};
use crate::store::{LedgerStore, NewBatch, NewItem};

/// Inventory service for managing items and their batches
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn LedgerStore>,
    stock: StockService,
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            stock: StockService::new(store.clone()),
            store,
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Create an item, optionally with its first batch
    pub async fn create_item(
        &self,
        input: CreateItemInput,
        performed_by: &str,
    ) -> AppResult<ItemWithStock> {
        input.validate()?;
        let name = normalize_item_name(&input.name).map_err(|m| AppError::invalid("name", m))?;
        self.ensure_name_free(&name, None).await?;

        // Validate the batch before anything is written
        let initial = input
            .initial_batch
            .as_ref()
            .map(|details| batch_from_details(0, details))
            .transpose()?;

        let item = self
            .store
            .insert_item(NewItem {
                name,
                description: input.description,
                threshold: input.threshold,
                unit: input.unit,
            })
            .await?;
        tracing::info!(item_id = item.id, name = %item.name, "Created item");

        if let Some(mut batch) = initial {
            batch.item_id = item.id;
            let who = Attribution::new(performed_by)
                .with_notes(format!("Initial stock for batch {}", batch.batch_number));
            self.stock
                .receive(batch, ReasonCode::InitialStock, &who)
                .await?;
        }

        self.get_item(item.id).await
    }

    /// Get an item with its live batches
    pub async fn get_item(&self, id: i64) -> AppResult<ItemWithStock> {
        let item = self.live_item(id).await?;
        let batches = self.store.list_batches(id).await?;
        Ok(ItemWithStock::new(item, batches))
    }

    /// List all live items with their batches
    pub async fn list_items(&self) -> AppResult<Vec<ItemWithStock>> {
        let items = self.store.list_items().await?;
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let batches = self.store.list_batches(item.id).await?;
            result.push(ItemWithStock::new(item, batches));
        }
        Ok(result)
    }

    /// Update item metadata. Stock is untouched; the edit is noted in the
    /// ledger with a zero-quantity row.
    pub async fn update_item(
        &self,
        id: i64,
        input: UpdateItemInput,
        performed_by: &str,
    ) -> AppResult<ItemWithStock> {
        input.validate()?;
        let mut item = self.live_item(id).await?;

        if let Some(name) = input.name {
            let name = normalize_item_name(&name).map_err(|m| AppError::invalid("name", m))?;
            if name != item.name {
                self.ensure_name_free(&name, Some(id)).await?;
                item.name = name;
            }
        }
        if let Some(description) = input.description {
            item.description = description;
        }
        if let Some(threshold) = input.threshold {
            item.threshold = threshold;
        }
        if let Some(unit) = input.unit {
            item.unit = unit;
        }

        let item = self.store.update_item(&item).await?;
        let who = Attribution::new(performed_by)
            .with_notes(format!("Item {} details updated", item.name));
        self.stock
            .note(item.id, ReasonCode::ItemDetailsUpdated, &who)
            .await?;
        tracing::info!(item_id = item.id, "Updated item details");

        self.get_item(id).await
    }

    /// Tombstone an item and all of its batches
    pub async fn delete_item(&self, id: i64, performed_by: &str) -> AppResult<()> {
        self.live_item(id).await?;
        let batches = self.store.list_batches(id).await?;
        let who = Attribution::new(performed_by).with_notes("Item and associated batches deleted");
        self.stock.remove(&batches, &who).await?;
        self.store.tombstone_item(id).await?;
        tracing::info!(item_id = id, batches = batches.len(), "Deleted item");
        Ok(())
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Add a purchased batch to an existing item
    pub async fn add_batch(&self, input: CreateBatchInput, performed_by: &str) -> AppResult<Batch> {
        input.validate()?;
        self.live_item(input.item_id).await?;
        let batch = batch_from_details(input.item_id, &input.details)?;
        let who = Attribution::new(performed_by)
            .with_notes(format!("Initial stock for batch {}", batch.batch_number));
        self.stock
            .receive(batch, ReasonCode::PurchaseEntry, &who)
            .await
    }

    /// Edit batch metadata and, if given, its quantity (as a correction)
    pub async fn update_batch(
        &self,
        id: i64,
        input: UpdateBatchInput,
        performed_by: &str,
    ) -> AppResult<Batch> {
        input.validate()?;
        let mut batch = self.live_batch(id).await?;

        let mut metadata_changed = false;
        if let Some(batch_number) = input.batch_number {
            validate_batch_number(&batch_number).map_err(|m| AppError::invalid("batch_number", m))?;
            metadata_changed |= batch.batch_number != batch_number;
            batch.batch_number = batch_number;
        }
        if let Some(expiry) = input.expiry_date {
            let expiry =
                parse_iso_date(&expiry).map_err(|m| AppError::invalid("expiry_date", m))?;
            metadata_changed |= batch.expiry_date != expiry;
            batch.expiry_date = expiry;
        }
        if input.mrp.is_some() && input.mrp != batch.mrp {
            batch.mrp = input.mrp;
            metadata_changed = true;
        }
        if let Some(location) = input.location {
            metadata_changed |= batch.location != location;
            batch.location = location;
        }

        if metadata_changed {
            batch = self.store.update_batch_metadata(&batch).await?;
        }

        if let Some(quantity) = input.quantity {
            if quantity != batch.quantity {
                let notes = input.notes.unwrap_or_else(|| {
                    format!("Quantity corrected from {} to {}", batch.quantity, quantity)
                });
                let who = Attribution::new(performed_by).with_notes(notes);
                self.stock.correct(&batch, quantity, &who).await?;
            }
        }

        self.live_batch(id).await
    }

    /// Tombstone a batch, writing its remaining quantity out of the ledger
    pub async fn delete_batch(&self, id: i64, performed_by: &str) -> AppResult<()> {
        let batch = self.live_batch(id).await?;
        let who = Attribution::new(performed_by)
            .with_notes(format!("Batch {} deleted", batch.batch_number));
        self.stock.remove(std::slice::from_ref(&batch), &who).await
    }

    // ========================================================================
    // Ledger and reports
    // ========================================================================

    /// Most recent ledger rows across all items
    pub async fn list_transactions(&self, limit: u32) -> AppResult<Vec<InventoryTransaction>> {
        Ok(self.store.list_transactions(limit).await?)
    }

    /// Full ledger history of one item, oldest first
    pub async fn item_transactions(&self, item_id: i64) -> AppResult<Vec<InventoryTransaction>> {
        self.item_exists(item_id).await?;
        Ok(self.store.item_transactions(item_id).await?)
    }

    /// Compare live batch stock with the ledger sum for one item
    pub async fn reconcile_item(&self, item_id: i64) -> AppResult<ItemReconciliation> {
        self.item_exists(item_id).await?;
        let batches = self.store.list_batches(item_id).await?;
        let ledger = self.store.item_transactions(item_id).await?;
        let report =
            ItemReconciliation::new(item_id, total_quantity(&batches), ledger_total(&ledger));
        if !report.balanced {
            tracing::warn!(
                item_id,
                batch_total = report.batch_total,
                ledger_total = report.ledger_total,
                "Ledger does not reconcile with batches"
            );
        }
        Ok(report)
    }

    /// Headline stock figures
    pub async fn dashboard_stats(&self) -> AppResult<DashboardStats> {
        let items = self.list_items().await?;
        let now = Utc::now();

        let mut stats = DashboardStats {
            total_items: items.len() as i64,
            ..Default::default()
        };
        for item in &items {
            if item.is_low_stock() {
                stats.low_stock_items += 1;
            }
            for batch in &item.batches {
                stats.total_value += batch.value();
                if batch.holds_expired_stock(now) {
                    stats.expired_batches += 1;
                }
            }
        }
        stats.total_value = stats.total_value.round_dp(2);

        Ok(stats)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    async fn live_item(&self, id: i64) -> AppResult<Item> {
        self.store
            .get_item(id)
            .await?
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("Item {}", id)))
    }

    /// Tombstoned items keep their history
    async fn item_exists(&self, id: i64) -> AppResult<Item> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {}", id)))
    }

    async fn live_batch(&self, id: i64) -> AppResult<Batch> {
        self.store
            .get_batch(id)
            .await?
            .filter(|b| !b.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("Batch {}", id)))
    }

    async fn ensure_name_free(&self, name: &str, except: Option<i64>) -> AppResult<()> {
        let taken = self
            .store
            .find_items_by_name(name)
            .await?
            .into_iter()
            .any(|i| Some(i.id) != except);
        if taken {
            return Err(AppError::DuplicateEntry("name".to_string()));
        }
        Ok(())
    }
}

/// Validate client batch fields and turn them into a store insert
fn batch_from_details(item_id: i64, details: &BatchDetailsInput) -> AppResult<NewBatch> {
    validate_batch_number(&details.batch_number)
        .map_err(|m| AppError::invalid("batch_number", m))?;
    if details.quantity < 0 {
        return Err(AppError::invalid("quantity", "Quantity cannot be negative"));
    }
    let expiry_date =
        parse_iso_date(&details.expiry_date).map_err(|m| AppError::invalid("expiry_date", m))?;

    Ok(NewBatch {
        item_id,
        batch_number: details.batch_number.trim().to_string(),
        quantity: details.quantity,
        expiry_date,
        mrp: details.mrp,
        location: details.location.clone(),
        source_reference: None,
    })
}
