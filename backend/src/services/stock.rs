//! Stock mutator: the only path that changes batch quantities.
//!
//! Every mutation is expressed as one [`LedgerChange`] that carries both
//! the batch writes and exactly one ledger row per affected batch, so the
//! ledger can never drift from the batches.

use std::sync::Arc;

use shared::{AllocationPlan, Batch, InventoryTransaction, ReasonCode};

use crate::error::AppResult;
use crate::store::{
    AppliedChange, BatchRef, BatchTombstone, IndentTransition, LedgerChange, LedgerStore,
    NewBatch, NewTransaction, QuantityAdjustment, ReceiptGuard,
};

/// Who performed a mutation and under which reference
#[derive(Debug, Clone)]
pub struct Attribution {
    pub performed_by: String,
    pub reference_id: String,
    pub notes: String,
}

impl Attribution {
    pub fn new(performed_by: impl Into<String>) -> Self {
        Self {
            performed_by: performed_by.into(),
            reference_id: String::new(),
            notes: String::new(),
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = reference_id.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    fn row(
        &self,
        item_id: i64,
        batch: BatchRef,
        change: i64,
        reason: ReasonCode,
    ) -> NewTransaction {
        NewTransaction {
            item_id,
            batch,
            quantity_change: change,
            reason,
            reference_id: self.reference_id.clone(),
            performed_by: self.performed_by.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Stock mutation service
#[derive(Clone)]
pub struct StockService {
    store: Arc<dyn LedgerStore>,
}

impl StockService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Change that decrements every planned batch and records one
    /// negative ledger row per batch
    pub fn commit_change(
        plan: &AllocationPlan<'_>,
        reason: ReasonCode,
        who: &Attribution,
    ) -> LedgerChange {
        let mut change = LedgerChange::default();
        for allocation in &plan.allocations {
            let batch = allocation.batch;
            change.adjustments.push(QuantityAdjustment {
                batch_id: batch.id,
                expected: batch.quantity,
                new_quantity: batch.quantity - allocation.quantity,
            });
            change.transactions.push(who.row(
                batch.item_id,
                BatchRef::Existing(batch.id),
                -allocation.quantity,
                reason,
            ));
        }
        change
    }

    /// Commit an allocation plan.
    ///
    /// Fails with `InsufficientStock` when any planned batch changed since
    /// the plan was computed; in that case nothing is written.
    pub async fn commit(
        &self,
        plan: &AllocationPlan<'_>,
        reason: ReasonCode,
        who: &Attribution,
    ) -> AppResult<Vec<InventoryTransaction>> {
        let change = Self::commit_change(plan, reason, who);
        if change.is_empty() {
            return Ok(Vec::new());
        }
        let applied = self.store.apply(change).await?;
        tracing::info!(
            reference = %who.reference_id,
            reason = %reason,
            batches = applied.transactions.len(),
            quantity = plan.allocated(),
            "Committed allocation"
        );
        Ok(applied.transactions)
    }

    /// Commit a plan together with an indent status move, atomically.
    ///
    /// Returns `StatusChanged`-derived `Conflict` when the indent moved
    /// underneath, so a redelivered request cannot decrement twice.
    pub async fn commit_with_transition(
        &self,
        plan: &AllocationPlan<'_>,
        reason: ReasonCode,
        who: &Attribution,
        transition: IndentTransition,
    ) -> AppResult<AppliedChange> {
        let mut change = Self::commit_change(plan, reason, who);
        change.indent = Some(transition);
        let applied = self.store.apply(change).await?;
        tracing::info!(
            reference = %who.reference_id,
            reason = %reason,
            batches = applied.transactions.len(),
            quantity = plan.allocated(),
            "Committed allocation with indent transition"
        );
        Ok(applied)
    }

    /// Create a batch and record its opening quantity
    pub async fn receive(
        &self,
        batch: NewBatch,
        reason: ReasonCode,
        who: &Attribution,
    ) -> AppResult<Batch> {
        let mut applied = self.receive_many(vec![batch], reason, who).await?;
        applied
            .pop()
            .ok_or_else(|| crate::error::AppError::Internal("batch was not created".to_string()))
    }

    /// Create several batches in one unit of work
    pub async fn receive_many(
        &self,
        batches: Vec<NewBatch>,
        reason: ReasonCode,
        who: &Attribution,
    ) -> AppResult<Vec<Batch>> {
        self.receive_change(batches, reason, who, None).await
    }

    /// Create batches for a receipt, failing with `Conflict` when another
    /// receipt under the same reference committed since `guard` was counted
    pub async fn receive_guarded(
        &self,
        batches: Vec<NewBatch>,
        reason: ReasonCode,
        who: &Attribution,
        guard: ReceiptGuard,
    ) -> AppResult<Vec<Batch>> {
        self.receive_change(batches, reason, who, Some(guard)).await
    }

    async fn receive_change(
        &self,
        batches: Vec<NewBatch>,
        reason: ReasonCode,
        who: &Attribution,
        receipt: Option<ReceiptGuard>,
    ) -> AppResult<Vec<Batch>> {
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        let transactions = batches
            .iter()
            .enumerate()
            .map(|(index, b)| who.row(b.item_id, BatchRef::Created(index), b.quantity, reason))
            .collect();
        let applied = self
            .store
            .apply(LedgerChange {
                new_batches: batches,
                transactions,
                receipt,
                ..Default::default()
            })
            .await?;

        for batch in &applied.batches {
            tracing::info!(
                item_id = batch.item_id,
                batch_id = batch.id,
                quantity = batch.quantity,
                reason = %reason,
                "Received batch"
            );
        }
        Ok(applied.batches)
    }

    /// Tombstone batches, writing one negative row per batch
    pub async fn remove(&self, batches: &[Batch], who: &Attribution) -> AppResult<()> {
        if batches.is_empty() {
            return Ok(());
        }
        let mut change = LedgerChange::default();
        for batch in batches {
            change.tombstones.push(BatchTombstone {
                batch_id: batch.id,
                expected: batch.quantity,
            });
            change.transactions.push(who.row(
                batch.item_id,
                BatchRef::Existing(batch.id),
                -batch.quantity,
                ReasonCode::BatchDeleted,
            ));
        }
        self.store.apply(change).await?;
        for batch in batches {
            tracing::info!(
                item_id = batch.item_id,
                batch_id = batch.id,
                quantity = batch.quantity,
                "Removed batch"
            );
        }
        Ok(())
    }

    /// Set a batch to an exact quantity, recording the difference as a
    /// correction. A zero difference writes nothing.
    pub async fn correct(
        &self,
        batch: &Batch,
        new_quantity: i64,
        who: &Attribution,
    ) -> AppResult<Option<InventoryTransaction>> {
        let diff = new_quantity - batch.quantity;
        if diff == 0 {
            return Ok(None);
        }
        let applied = self
            .store
            .apply(LedgerChange {
                adjustments: vec![QuantityAdjustment {
                    batch_id: batch.id,
                    expected: batch.quantity,
                    new_quantity,
                }],
                transactions: vec![who.row(
                    batch.item_id,
                    BatchRef::Existing(batch.id),
                    diff,
                    ReasonCode::Correction,
                )],
                ..Default::default()
            })
            .await?;
        tracing::info!(
            item_id = batch.item_id,
            batch_id = batch.id,
            change = diff,
            "Corrected batch quantity"
        );
        Ok(applied.transactions.into_iter().next())
    }

    /// Item-level zero-delta row
    pub async fn note(
        &self,
        item_id: i64,
        reason: ReasonCode,
        who: &Attribution,
    ) -> AppResult<InventoryTransaction> {
        let applied = self
            .store
            .apply(LedgerChange {
                transactions: vec![who.row(item_id, BatchRef::None, 0, reason)],
                ..Default::default()
            })
            .await?;
        applied
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| {
                crate::error::AppError::Internal("ledger row was not written".to_string())
            })
    }
}
