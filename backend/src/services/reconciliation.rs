//! Pharmacy-side reconciliation: receive dispatched indents from the
//! hospital as local batches, then confirm fulfilment.
//!
//! Receipt is keyed by the indent reference (`IND-<id>`). Plan entries that
//! already produced a local batch under that reference are skipped, so a
//! failed receipt can simply be retried.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use shared::{
    normalize_item_name, Batch, CreateIndentInput, DispatchEntry, Indent, IndentStatus, Item,
    ReasonCode, RECEIVED_INDENT_LOCATION,
};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::external::HospitalClient;
use crate::services::stock::{Attribution, StockService};
use crate::store::{LedgerStore, NewBatch, NewItem, ReceiptGuard, StoreError};

/// Description given to items first seen through an indent
pub const IMPORTED_ITEM_DESCRIPTION: &str = "Imported via Indent";
/// Unit given to items first seen through an indent
pub const IMPORTED_ITEM_UNIT: &str = "Units";

const RECEIPT_ATTEMPTS: u32 = 3;

/// Result of receiving one indent
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptReport {
    /// Indent as the hospital reports it after confirmation
    pub indent: Indent,
    pub item_id: i64,
    /// Batches created by this call
    pub received: Vec<Batch>,
    /// Plan entries already received by an earlier attempt
    pub skipped: usize,
}

/// Reconciliation service for the requesting side
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn LedgerStore>,
    stock: StockService,
    hospital: HospitalClient,
    pharmacy_id: String,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn LedgerStore>, hospital: HospitalClient, pharmacy_id: String) -> Self {
        Self {
            stock: StockService::new(store.clone()),
            store,
            hospital,
            pharmacy_id,
        }
    }

    /// Raise an indent on the hospital on behalf of this pharmacy
    pub async fn raise_indent(&self, mut input: CreateIndentInput) -> AppResult<Indent> {
        input.validate()?;
        input.pharmacy_id = self.pharmacy_id.clone();
        let indent = self.hospital.create_indent(&input).await?;
        tracing::info!(
            indent_id = indent.id,
            item = %indent.item_name,
            quantity = indent.quantity,
            "Raised indent on hospital"
        );
        Ok(indent)
    }

    /// Pull a dispatched indent, ingest its plan and confirm receipt
    pub async fn receive_indent(&self, id: i64, performed_by: &str) -> AppResult<ReceiptReport> {
        let remote = self.hospital.get_indent(id).await?;
        if !matches!(
            remote.status,
            IndentStatus::Dispatched | IndentStatus::Fulfilled
        ) {
            return Err(AppError::InvalidStateTransition(format!(
                "indent {} is {}; only dispatched indents can be received",
                id, remote.status
            )));
        }
        if !remote.pharmacy_id.is_empty() && remote.pharmacy_id != self.pharmacy_id {
            tracing::warn!(
                indent_id = id,
                owner = %remote.pharmacy_id,
                pharmacy = %self.pharmacy_id,
                "Refusing to receive another pharmacy's indent"
            );
            return Err(AppError::Conflict(format!(
                "indent {} was raised by pharmacy {}, not {}",
                id, remote.pharmacy_id, self.pharmacy_id
            )));
        }

        let entries = remote
            .dispatch_plan()
            .map_err(|e| AppError::MalformedPlan(format!("indent {}: {}", id, e)))?;
        validate_plan(id, &entries)?;

        let item = self.resolve_or_create_item(&remote.item_name).await?;
        let reference = remote.reference();
        let who = Attribution::new(performed_by)
            .with_reference(reference.clone())
            .with_notes(format!("Received against indent {}", id));

        let mut attempt = 1;
        let (received, skipped) = loop {
            let already = self.received_batch_numbers(item.id, &reference).await?;
            let guard = ReceiptGuard {
                item_id: item.id,
                reference: reference.clone(),
                expected: already.values().sum::<usize>() as i64,
            };
            let (batches, skipped) = pending_batches(&entries, already, item.id, &reference);

            match self
                .stock
                .receive_guarded(batches, ReasonCode::Indent, &who, guard)
                .await
            {
                Ok(received) => break (received, skipped),
                // A concurrent receipt of this indent committed first; recount
                Err(AppError::Conflict(reason)) if attempt < RECEIPT_ATTEMPTS => {
                    tracing::warn!(indent_id = id, attempt, %reason, "Receipt raced; recounting");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        tracing::info!(
            indent_id = id,
            item_id = item.id,
            received = received.len(),
            skipped,
            "Ingested dispatched indent"
        );

        let indent = if remote.status == IndentStatus::Fulfilled {
            remote
        } else {
            let confirmed = self
                .hospital
                .update_status(id, IndentStatus::Fulfilled, performed_by)
                .await
                .map_err(|e| manual_reconciliation(id, e))?;
            if confirmed.status != IndentStatus::Fulfilled {
                return Err(manual_reconciliation(
                    id,
                    AppError::InvalidStateTransition(format!(
                        "hospital reports indent {} as {}",
                        id, confirmed.status
                    )),
                ));
            }
            confirmed
        };

        Ok(ReceiptReport {
            indent,
            item_id: item.id,
            received,
            skipped,
        })
    }

    /// Batch numbers already received under `reference`, with multiplicity
    async fn received_batch_numbers(
        &self,
        item_id: i64,
        reference: &str,
    ) -> AppResult<HashMap<String, usize>> {
        let mut seen = HashMap::new();
        // The ledger keeps rows for batches deleted since receipt
        for row in self.store.reference_transactions(reference).await? {
            if row.item_id != item_id || row.reason != ReasonCode::Indent {
                continue;
            }
            let Some(batch_id) = row.batch_id else { continue };
            if let Some(batch) = self.store.get_batch(batch_id).await? {
                if batch.source_reference.as_deref() == Some(reference) {
                    *seen.entry(batch.batch_number).or_insert(0) += 1;
                }
            }
        }
        Ok(seen)
    }

    /// Local item with this exact name, created on first receipt
    async fn resolve_or_create_item(&self, name: &str) -> AppResult<Item> {
        let name = normalize_item_name(name).map_err(|m| AppError::MalformedPlan(m.to_string()))?;
        let mut matches = self.store.find_items_by_name(&name).await?;
        match matches.len() {
            0 => {}
            1 => return Ok(matches.remove(0)),
            n => return Err(AppError::Conflict(format!("{} items are named '{}'", n, name))),
        }

        let created = self
            .store
            .insert_item(NewItem {
                name: name.clone(),
                description: IMPORTED_ITEM_DESCRIPTION.to_string(),
                threshold: 0,
                unit: IMPORTED_ITEM_UNIT.to_string(),
            })
            .await;
        match created {
            Ok(item) => {
                tracing::info!(item_id = item.id, name = %item.name, "Created item from indent");
                Ok(item)
            }
            // Created by a concurrent receipt
            Err(StoreError::DuplicateName { .. }) => self
                .store
                .find_items_by_name(&name)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| AppError::NotFound(format!("Item '{}'", name))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Plan entries not yet received, and how many were skipped
fn pending_batches(
    entries: &[DispatchEntry],
    mut already: HashMap<String, usize>,
    item_id: i64,
    reference: &str,
) -> (Vec<NewBatch>, usize) {
    let mut skipped = 0;
    let mut batches = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(count) = already.get_mut(&entry.batch_number).filter(|c| **c > 0) {
            *count -= 1;
            skipped += 1;
            continue;
        }
        batches.push(NewBatch {
            item_id,
            batch_number: entry.batch_number.clone(),
            quantity: entry.quantity,
            expiry_date: entry.expiry_date,
            mrp: entry.mrp,
            location: RECEIVED_INDENT_LOCATION.to_string(),
            source_reference: Some(reference.to_string()),
        });
    }
    (batches, skipped)
}

fn validate_plan(id: i64, entries: &[DispatchEntry]) -> AppResult<()> {
    for (index, entry) in entries.iter().enumerate() {
        if entry.batch_number.trim().is_empty() {
            return Err(AppError::MalformedPlan(format!(
                "indent {} entry {} has no batch number",
                id, index
            )));
        }
        if entry.quantity <= 0 {
            return Err(AppError::MalformedPlan(format!(
                "indent {} entry {} has quantity {}",
                id, index, entry.quantity
            )));
        }
    }
    Ok(())
}

/// Stock is already in the local ledger when confirmation fails
fn manual_reconciliation(id: i64, err: AppError) -> AppError {
    let note = format!(
        "indent {} was received locally but the hospital was not updated; \
         manual reconciliation may be required (retrying the receipt is safe)",
        id
    );
    tracing::error!(indent_id = id, error = %err, "Fulfilment confirmation failed");
    match err {
        AppError::RemoteUnavailable(msg) => {
            AppError::RemoteUnavailable(format!("{}: {}", note, msg))
        }
        AppError::InvalidStateTransition(msg) => {
            AppError::InvalidStateTransition(format!("{}: {}", note, msg))
        }
        other => AppError::RemoteRejected(format!("{}: {}", note, other)),
    }
}
