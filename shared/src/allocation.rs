//! First-expiry-first-out batch allocation
//!
//! Pure planning: given a target quantity and a snapshot of an item's
//! batches, decide which batches satisfy it and how much each gives.
//! Nothing here touches storage; the caller commits the plan.

use crate::models::{Batch, DispatchEntry};

/// Quantity taken from one batch
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation<'a> {
    pub batch: &'a Batch,
    pub quantity: i64,
}

/// Ordered allocations plus whatever could not be covered
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllocationPlan<'a> {
    pub allocations: Vec<Allocation<'a>>,
    /// Unmet quantity; 0 when fully satisfied
    pub remainder: i64,
}

impl<'a> AllocationPlan<'a> {
    pub fn allocated(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.remainder == 0
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Wire form stored in `dispatch_details`
    pub fn dispatch_entries(&self) -> Vec<DispatchEntry> {
        self.allocations
            .iter()
            .map(|a| DispatchEntry {
                batch_number: a.batch.batch_number.clone(),
                quantity: a.quantity,
                expiry_date: a.batch.expiry_date,
                mrp: a.batch.mrp,
                location: a.batch.location.clone(),
            })
            .collect()
    }
}

/// Plan an allocation of `target` units across `batches`.
///
/// Empty and tombstoned batches are skipped; the rest are consumed in
/// ascending expiry order (ties broken by id, so the result is
/// deterministic for a given snapshot). A non-positive target yields an
/// empty plan. Insufficient stock yields a partial plan with a nonzero
/// remainder rather than an error.
pub fn plan(target: i64, batches: &[Batch]) -> AllocationPlan<'_> {
    if target <= 0 {
        return AllocationPlan::default();
    }

    let mut candidates: Vec<&Batch> = batches
        .iter()
        .filter(|b| b.quantity > 0 && !b.is_deleted())
        .collect();
    candidates.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then(a.id.cmp(&b.id)));

    let mut remaining = target;
    let mut allocations = Vec::new();

    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        allocations.push(Allocation {
            batch,
            quantity: take,
        });
        remaining -= take;
    }

    AllocationPlan {
        allocations,
        remainder: remaining,
    }
}
