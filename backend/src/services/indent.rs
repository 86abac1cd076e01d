//! Indent state machine.
//!
//! `PENDING -> PROCESSING -> DISPATCHED -> FULFILLED`, plus `REJECTED` from
//! any non-terminal state. A request whose precondition does not hold is a
//! no-op that returns the indent unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use shared::{
    encode_plan, normalize_item_name, plan, CreateIndentInput, Indent, IndentStatus, Item,
    ReasonCode,
};
use validator::Validate;

use crate::config::IndentConfig;
use crate::error::{AppError, AppResult};
use crate::services::stock::{Attribution, StockService};
use crate::store::{
    BatchRef, IndentTransition, LedgerChange, LedgerStore, NewIndent, NewTransaction,
    QuantityAdjustment,
};

/// Indent service for the supplying side
#[derive(Clone)]
pub struct IndentService {
    store: Arc<dyn LedgerStore>,
    stock: StockService,
    policy: IndentConfig,
}

impl IndentService {
    pub fn new(store: Arc<dyn LedgerStore>, policy: IndentConfig) -> Self {
        Self {
            stock: StockService::new(store.clone()),
            store,
            policy,
        }
    }

    /// Raise a new indent in PENDING. No stock is touched.
    pub async fn create_indent(&self, input: CreateIndentInput) -> AppResult<Indent> {
        input.validate()?;
        let item_name =
            normalize_item_name(&input.item_name).map_err(|m| AppError::invalid("item_name", m))?;

        let indent = self
            .store
            .insert_indent(NewIndent {
                item_name,
                quantity: input.quantity,
                pharmacy_id: input.pharmacy_id.trim().to_string(),
            })
            .await?;
        tracing::info!(
            indent_id = indent.id,
            item = %indent.item_name,
            quantity = indent.quantity,
            pharmacy = %indent.pharmacy_id,
            "Created indent"
        );
        Ok(indent)
    }

    pub async fn get_indent(&self, id: i64) -> AppResult<Indent> {
        self.store
            .get_indent(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Indent {}", id)))
    }

    pub async fn list_indents(&self) -> AppResult<Vec<Indent>> {
        Ok(self.store.list_indents().await?)
    }

    /// Drive an indent towards `status`
    pub async fn process_indent(
        &self,
        id: i64,
        status: &str,
        performed_by: &str,
    ) -> AppResult<Indent> {
        let target: IndentStatus = status
            .trim()
            .parse()
            .map_err(|e: shared::ParseEnumError| AppError::invalid("status", e.to_string()))?;
        let indent = self.get_indent(id).await?;

        let precondition_holds = match target.required_predecessor() {
            Some(required) => indent.status == required,
            None if target == IndentStatus::Rejected => !indent.status.is_terminal(),
            // PENDING is only ever set at creation
            None => false,
        };
        if !precondition_holds {
            tracing::debug!(
                indent_id = id,
                current = %indent.status,
                requested = %target,
                "Indent transition precondition not met; ignoring"
            );
            return Ok(indent);
        }

        match target {
            IndentStatus::Processing => self.propose(indent).await,
            IndentStatus::Dispatched => self.dispatch(indent, performed_by).await,
            IndentStatus::Fulfilled => self.fulfill(indent).await,
            IndentStatus::Rejected => self.reject(indent, performed_by).await,
            IndentStatus::Pending => Ok(indent),
        }
    }

    /// PENDING -> PROCESSING: plan against current stock, commit nothing
    async fn propose(&self, indent: Indent) -> AppResult<Indent> {
        let item = self.resolve_item(&indent.item_name).await?;
        let batches = self.store.list_batches(item.id).await?;
        let allocation = plan(indent.quantity, &batches);
        if !allocation.is_complete() {
            tracing::warn!(
                indent_id = indent.id,
                requested = indent.quantity,
                available = allocation.allocated(),
                "Partial allocation proposed"
            );
        }

        let transition = IndentTransition {
            indent_id: indent.id,
            from: IndentStatus::Pending,
            to: IndentStatus::Processing,
            dispatch_details: Some(encode_plan(&allocation.dispatch_entries())),
        };
        match self.store.transition_indent(transition).await? {
            Some(updated) => {
                tracing::info!(
                    indent_id = updated.id,
                    batches = allocation.allocations.len(),
                    "Indent moved to PROCESSING"
                );
                Ok(updated)
            }
            None => self.get_indent(indent.id).await,
        }
    }

    /// PROCESSING -> DISPATCHED: recompute the plan and commit it together
    /// with the status change
    async fn dispatch(&self, indent: Indent, performed_by: &str) -> AppResult<Indent> {
        let item = self.resolve_item(&indent.item_name).await?;
        let who = Attribution::new(performed_by)
            .with_reference(indent.reference())
            .with_notes(format!("Dispatched against indent {}", indent.id));
        let attempts = self.policy.dispatch_attempts.max(1);

        let mut attempt = 1;
        loop {
            let batches = self.store.list_batches(item.id).await?;
            let allocation = plan(indent.quantity, &batches);
            if !allocation.is_complete() {
                tracing::warn!(
                    indent_id = indent.id,
                    requested = indent.quantity,
                    available = allocation.allocated(),
                    "Dispatching partial allocation"
                );
            }

            let transition = IndentTransition {
                indent_id: indent.id,
                from: IndentStatus::Processing,
                to: IndentStatus::Dispatched,
                dispatch_details: Some(encode_plan(&allocation.dispatch_entries())),
            };
            match self
                .stock
                .commit_with_transition(&allocation, ReasonCode::Indent, &who, transition)
                .await
            {
                Ok(applied) => {
                    tracing::info!(
                        indent_id = indent.id,
                        quantity = allocation.allocated(),
                        "Indent moved to DISPATCHED"
                    );
                    return match applied.indent {
                        Some(updated) => Ok(updated),
                        None => self.get_indent(indent.id).await,
                    };
                }
                Err(AppError::InsufficientStock(reason)) if attempt < attempts => {
                    tracing::warn!(
                        indent_id = indent.id,
                        attempt,
                        %reason,
                        "Stock changed during dispatch; replanning"
                    );
                    attempt += 1;
                }
                // Another request already moved the indent
                Err(AppError::Conflict(_)) => return self.get_indent(indent.id).await,
                Err(e) => return Err(e),
            }
        }
    }

    /// DISPATCHED -> FULFILLED: receipt confirmed, no stock effect
    async fn fulfill(&self, indent: Indent) -> AppResult<Indent> {
        let transition = IndentTransition {
            indent_id: indent.id,
            from: IndentStatus::Dispatched,
            to: IndentStatus::Fulfilled,
            dispatch_details: None,
        };
        match self.store.transition_indent(transition).await? {
            Some(updated) => {
                tracing::info!(indent_id = updated.id, "Indent moved to FULFILLED");
                Ok(updated)
            }
            None => self.get_indent(indent.id).await,
        }
    }

    /// Any non-terminal -> REJECTED, restocking a dispatched indent when
    /// configured to
    async fn reject(&self, indent: Indent, performed_by: &str) -> AppResult<Indent> {
        if indent.status == IndentStatus::Dispatched && self.policy.restock_on_reject {
            return self.reject_and_restock(indent, performed_by).await;
        }
        if indent.status == IndentStatus::Dispatched {
            tracing::warn!(
                indent_id = indent.id,
                "Rejecting dispatched indent without restocking"
            );
        }

        let transition = IndentTransition {
            indent_id: indent.id,
            from: indent.status,
            to: IndentStatus::Rejected,
            dispatch_details: None,
        };
        match self.store.transition_indent(transition).await? {
            Some(updated) => {
                tracing::info!(
                    indent_id = updated.id,
                    from = %indent.status,
                    "Indent moved to REJECTED"
                );
                Ok(updated)
            }
            None => self.get_indent(indent.id).await,
        }
    }

    /// Reverse the dispatch rows of this indent with corrections and reject
    /// it, in one unit of work
    async fn reject_and_restock(&self, indent: Indent, performed_by: &str) -> AppResult<Indent> {
        let reference = indent.reference();
        let attempts = self.policy.dispatch_attempts.max(1);

        // Quantity taken from each batch by the dispatch
        let mut taken: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
        for row in self.store.reference_transactions(&reference).await? {
            if row.reason != ReasonCode::Indent || row.quantity_change >= 0 {
                continue;
            }
            if let Some(batch_id) = row.batch_id {
                taken.entry(batch_id).or_insert((row.item_id, 0)).1 += -row.quantity_change;
            }
        }

        let mut attempt = 1;
        loop {
            let mut change = LedgerChange {
                indent: Some(IndentTransition {
                    indent_id: indent.id,
                    from: IndentStatus::Dispatched,
                    to: IndentStatus::Rejected,
                    dispatch_details: None,
                }),
                ..Default::default()
            };
            for (&batch_id, &(item_id, quantity)) in &taken {
                let batch = match self.store.get_batch(batch_id).await? {
                    Some(batch) if !batch.is_deleted() => batch,
                    _ => {
                        tracing::warn!(
                            indent_id = indent.id,
                            batch_id,
                            quantity,
                            "Dispatched batch no longer exists; not restocked"
                        );
                        continue;
                    }
                };
                change.adjustments.push(QuantityAdjustment {
                    batch_id,
                    expected: batch.quantity,
                    new_quantity: batch.quantity + quantity,
                });
                change.transactions.push(NewTransaction {
                    item_id,
                    batch: BatchRef::Existing(batch_id),
                    quantity_change: quantity,
                    reason: ReasonCode::Correction,
                    reference_id: reference.clone(),
                    performed_by: performed_by.to_string(),
                    notes: format!("Restocked after indent {} was rejected", indent.id),
                });
            }

            match self.store.apply(change).await.map_err(AppError::from) {
                Ok(applied) => {
                    tracing::info!(
                        indent_id = indent.id,
                        batches = applied.transactions.len(),
                        "Indent moved to REJECTED and dispatched stock restored"
                    );
                    return match applied.indent {
                        Some(updated) => Ok(updated),
                        None => self.get_indent(indent.id).await,
                    };
                }
                Err(AppError::InsufficientStock(reason)) if attempt < attempts => {
                    tracing::warn!(
                        indent_id = indent.id,
                        attempt,
                        %reason,
                        "Batch changed during restock; retrying"
                    );
                    attempt += 1;
                }
                Err(AppError::Conflict(_)) => return self.get_indent(indent.id).await,
                Err(e) => return Err(e),
            }
        }
    }

    /// Look up the single live item with exactly this name
    async fn resolve_item(&self, name: &str) -> AppResult<Item> {
        let name = normalize_item_name(name).map_err(|m| AppError::invalid("item_name", m))?;
        let mut matches = self.store.find_items_by_name(&name).await?;
        match matches.len() {
            0 => Err(AppError::NotFound(format!("Item '{}'", name))),
            1 => Ok(matches.remove(0)),
            n => Err(AppError::Conflict(format!(
                "{} items are named '{}'",
                n, name
            ))),
        }
    }
}
