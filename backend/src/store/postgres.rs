//! PostgreSQL ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{Batch, Indent, InventoryTransaction, Item};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{
    AppliedChange, BatchRef, IndentTransition, LedgerChange, LedgerStore, NewBatch, NewIndent,
    NewItem, NewTransaction, StoreError, StoreResult,
};

const ITEM_COLUMNS: &str =
    "id, name, description, threshold, unit, created_at, updated_at, deleted_at";
const BATCH_COLUMNS: &str = "id, item_id, batch_number, quantity, expiry_date, mrp, location, \
     source_reference, created_at, updated_at, deleted_at";
const TRANSACTION_COLUMNS: &str = "id, item_id, batch_id, quantity_change, reason, reference_id, \
     performed_by, notes, timestamp";
const INDENT_COLUMNS: &str =
    "id, item_name, quantity, status, pharmacy_id, dispatch_details, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    name: String,
    description: String,
    threshold: i64,
    unit: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            name: row.name,
            description: row.description,
            threshold: row.threshold,
            unit: row.unit,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    item_id: i64,
    batch_number: String,
    quantity: i64,
    expiry_date: DateTime<Utc>,
    mrp: Option<Decimal>,
    location: String,
    source_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Batch {
            id: row.id,
            item_id: row.item_id,
            batch_number: row.batch_number,
            quantity: row.quantity,
            expiry_date: row.expiry_date,
            mrp: row.mrp,
            location: row.location,
            source_reference: row.source_reference,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Reason is stored as its wire string
#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    item_id: i64,
    batch_id: Option<i64>,
    quantity_change: i64,
    reason: String,
    reference_id: String,
    performed_by: String,
    notes: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for InventoryTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let reason = row
            .reason
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("transaction {}: {}", row.id, e)))?;
        Ok(InventoryTransaction {
            id: row.id,
            item_id: row.item_id,
            batch_id: row.batch_id,
            quantity_change: row.quantity_change,
            reason,
            reference_id: row.reference_id,
            performed_by: row.performed_by,
            notes: row.notes,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, FromRow)]
struct IndentRow {
    id: i64,
    item_name: String,
    quantity: i64,
    status: String,
    pharmacy_id: String,
    dispatch_details: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IndentRow> for Indent {
    type Error = StoreError;

    fn try_from(row: IndentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("indent {}: {}", row.id, e)))?;
        Ok(Indent {
            id: row.id,
            item_name: row.item_name,
            quantity: row.quantity,
            status,
            pharmacy_id: row.pharmacy_id,
            dispatch_details: row.dispatch_details,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Unique violation on `idx_items_live_name`
fn name_conflict(err: sqlx::Error, name: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateName {
            name: name.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

fn convert_transactions(rows: Vec<TransactionRow>) -> StoreResult<Vec<InventoryTransaction>> {
    rows.into_iter().map(InventoryTransaction::try_from).collect()
}

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_batch_tx(
        tx: &mut Transaction<'_, Postgres>,
        batch: &NewBatch,
    ) -> StoreResult<Batch> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            INSERT INTO batches (item_id, batch_number, quantity, expiry_date, mrp, location,
                                 source_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(batch.item_id)
        .bind(&batch.batch_number)
        .bind(batch.quantity)
        .bind(batch.expiry_date)
        .bind(batch.mrp)
        .bind(&batch.location)
        .bind(&batch.source_reference)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.into())
    }

    async fn insert_transaction_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewTransaction,
        batch_id: Option<i64>,
    ) -> StoreResult<InventoryTransaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO inventory_transactions (item_id, batch_id, quantity_change, reason,
                                                reference_id, performed_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(entry.item_id)
        .bind(batch_id)
        .bind(entry.quantity_change)
        .bind(entry.reason.as_str())
        .bind(&entry.reference_id)
        .bind(&entry.performed_by)
        .bind(&entry.notes)
        .fetch_one(&mut **tx)
        .await?;

        row.try_into()
    }

    async fn transition_indent_tx(
        tx: &mut Transaction<'_, Postgres>,
        transition: &IndentTransition,
    ) -> StoreResult<Option<Indent>> {
        let row = sqlx::query_as::<_, IndentRow>(&format!(
            r#"
            UPDATE indents
            SET status = $1,
                dispatch_details = COALESCE($2, dispatch_details),
                updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            INDENT_COLUMNS
        ))
        .bind(transition.to.as_str())
        .bind(&transition.dispatch_details)
        .bind(transition.indent_id)
        .bind(transition.from.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Indent::try_from).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_item(&self, item: NewItem) -> StoreResult<Item> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            INSERT INTO items (name, description, threshold, unit)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.threshold)
        .bind(&item.unit)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| name_conflict(e, &item.name))?;

        Ok(row.into())
    }

    async fn get_item(&self, id: i64) -> StoreResult<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM items WHERE id = $1",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Item::from))
    }

    async fn find_items_by_name(&self, name: &str) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM items WHERE name = $1 AND deleted_at IS NULL ORDER BY id",
            ITEM_COLUMNS
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    async fn list_items(&self) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM items WHERE deleted_at IS NULL ORDER BY name, id",
            ITEM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    async fn update_item(&self, item: &Item) -> StoreResult<Item> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            UPDATE items
            SET name = $1, description = $2, threshold = $3, unit = $4, updated_at = NOW()
            WHERE id = $5 AND deleted_at IS NULL
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.threshold)
        .bind(&item.unit)
        .bind(item.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| name_conflict(e, &item.name))?
        .ok_or(StoreError::NotFound {
            entity: "item",
            id: item.id,
        })?;

        Ok(row.into())
    }

    async fn tombstone_item(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE items SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "item", id });
        }
        Ok(())
    }

    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches WHERE id = $1",
            BATCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Batch::from))
    }

    async fn list_batches(&self, item_id: i64) -> StoreResult<Vec<Batch>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            SELECT {} FROM batches
            WHERE item_id = $1 AND deleted_at IS NULL
            ORDER BY expiry_date ASC, id ASC
            "#,
            BATCH_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Batch::from).collect())
    }

    async fn update_batch_metadata(&self, batch: &Batch) -> StoreResult<Batch> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            UPDATE batches
            SET batch_number = $1, expiry_date = $2, mrp = $3, location = $4, updated_at = NOW()
            WHERE id = $5 AND deleted_at IS NULL
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(&batch.batch_number)
        .bind(batch.expiry_date)
        .bind(batch.mrp)
        .bind(&batch.location)
        .bind(batch.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "batch",
            id: batch.id,
        })?;

        Ok(row.into())
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
        let result = sqlx::query(
            "UPDATE batches SET quantity = $1, updated_at = NOW() \
             WHERE id = $2 AND quantity = $3 AND deleted_at IS NULL",
        )
        .bind(new_quantity)
        .bind(batch_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_transactions(&self, limit: u32) -> StoreResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM inventory_transactions ORDER BY timestamp DESC, id DESC LIMIT $1",
            TRANSACTION_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        convert_transactions(rows)
    }

    async fn item_transactions(&self, item_id: i64) -> StoreResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM inventory_transactions WHERE item_id = $1 ORDER BY id",
            TRANSACTION_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        convert_transactions(rows)
    }

    async fn reference_transactions(
        &self,
        reference_id: &str,
    ) -> StoreResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM inventory_transactions WHERE reference_id = $1 ORDER BY id",
            TRANSACTION_COLUMNS
        ))
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        convert_transactions(rows)
    }

    async fn insert_indent(&self, indent: NewIndent) -> StoreResult<Indent> {
        let row = sqlx::query_as::<_, IndentRow>(&format!(
            r#"
            INSERT INTO indents (item_name, quantity, status, pharmacy_id)
            VALUES ($1, $2, 'PENDING', $3)
            RETURNING {}
            "#,
            INDENT_COLUMNS
        ))
        .bind(&indent.item_name)
        .bind(indent.quantity)
        .bind(&indent.pharmacy_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_indent(&self, id: i64) -> StoreResult<Option<Indent>> {
        let row = sqlx::query_as::<_, IndentRow>(&format!(
            "SELECT {} FROM indents WHERE id = $1",
            INDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Indent::try_from).transpose()
    }

    async fn list_indents(&self) -> StoreResult<Vec<Indent>> {
        let rows = sqlx::query_as::<_, IndentRow>(&format!(
            "SELECT {} FROM indents ORDER BY created_at DESC, id DESC",
            INDENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Indent::try_from).collect()
    }

    async fn transition_indent(
        &self,
        transition: IndentTransition,
    ) -> StoreResult<Option<Indent>> {
        let mut tx = self.pool.begin().await?;
        let indent = Self::transition_indent_tx(&mut tx, &transition).await?;
        tx.commit().await?;
        Ok(indent)
    }

    async fn apply(&self, change: LedgerChange) -> StoreResult<AppliedChange> {
        let mut tx = self.pool.begin().await?;
        let mut applied = AppliedChange::default();

        // Any early return drops `tx`, which rolls back
        if let Some(guard) = &change.receipt {
            // Held until commit; overlapping receipts of one reference queue here
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&guard.reference)
                .execute(&mut *tx)
                .await?;
            let received: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM batches WHERE item_id = $1 AND source_reference = $2",
            )
            .bind(guard.item_id)
            .bind(&guard.reference)
            .fetch_one(&mut *tx)
            .await?;
            if received != guard.expected {
                return Err(StoreError::ReceiptChanged {
                    reference: guard.reference.clone(),
                });
            }
        }

        if let Some(transition) = &change.indent {
            let indent = Self::transition_indent_tx(&mut tx, transition)
                .await?
                .ok_or(StoreError::StatusChanged {
                    indent_id: transition.indent_id,
                })?;
            applied.indent = Some(indent);
        }

        for adjustment in &change.adjustments {
            if adjustment.new_quantity < 0 {
                return Err(StoreError::StaleBatch {
                    batch_id: adjustment.batch_id,
                });
            }
            let row = sqlx::query_as::<_, BatchRow>(&format!(
                r#"
                UPDATE batches SET quantity = $1, updated_at = NOW()
                WHERE id = $2 AND quantity = $3 AND deleted_at IS NULL
                RETURNING {}
                "#,
                BATCH_COLUMNS
            ))
            .bind(adjustment.new_quantity)
            .bind(adjustment.batch_id)
            .bind(adjustment.expected)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::StaleBatch {
                batch_id: adjustment.batch_id,
            })?;
            applied.batches.push(row.into());
        }

        for tombstone in &change.tombstones {
            let row = sqlx::query_as::<_, BatchRow>(&format!(
                r#"
                UPDATE batches SET deleted_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND quantity = $2 AND deleted_at IS NULL
                RETURNING {}
                "#,
                BATCH_COLUMNS
            ))
            .bind(tombstone.batch_id)
            .bind(tombstone.expected)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::StaleBatch {
                batch_id: tombstone.batch_id,
            })?;
            applied.batches.push(row.into());
        }

        let mut created = Vec::with_capacity(change.new_batches.len());
        for batch in &change.new_batches {
            let batch = Self::insert_batch_tx(&mut tx, batch).await?;
            created.push(batch.id);
            applied.batches.push(batch);
        }

        for entry in &change.transactions {
            let batch_id = match entry.batch {
                BatchRef::None => None,
                BatchRef::Existing(id) => Some(id),
                BatchRef::Created(index) => Some(*created.get(index).ok_or_else(|| {
                    StoreError::Corrupt(format!("ledger row references new batch #{}", index))
                })?),
            };
            let row = Self::insert_transaction_tx(&mut tx, entry, batch_id).await?;
            applied.transactions.push(row);
        }

        tx.commit().await?;
        Ok(applied)
    }
}
