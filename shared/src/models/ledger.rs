//! Append-only stock ledger models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

/// Reason attached to every ledger row. Closed set, shared with the
/// counterpart service over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    #[serde(rename = "Initial Stock")]
    InitialStock,
    #[serde(rename = "Purchase/Entry")]
    PurchaseEntry,
    #[serde(rename = "Indent")]
    Indent,
    #[serde(rename = "Batch Deleted")]
    BatchDeleted,
    #[serde(rename = "Item Details Updated")]
    ItemDetailsUpdated,
    #[serde(rename = "Correction")]
    Correction,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 6] = [
        ReasonCode::InitialStock,
        ReasonCode::PurchaseEntry,
        ReasonCode::Indent,
        ReasonCode::BatchDeleted,
        ReasonCode::ItemDetailsUpdated,
        ReasonCode::Correction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InitialStock => "Initial Stock",
            ReasonCode::PurchaseEntry => "Purchase/Entry",
            ReasonCode::Indent => "Indent",
            ReasonCode::BatchDeleted => "Batch Deleted",
            ReasonCode::ItemDetailsUpdated => "Item Details Updated",
            ReasonCode::Correction => "Correction",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReasonCode::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("reason", s))
    }
}

/// One immutable quantity change.
///
/// Rows are never updated or deleted; for every item the sum of
/// `quantity_change` equals the sum of its live batch quantities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryTransaction {
    pub id: i64,
    pub item_id: i64,
    pub batch_id: Option<i64>,
    /// Positive for stock in, negative for stock out
    pub quantity_change: i64,
    pub reason: ReasonCode,
    /// Order/indent/invoice reference, e.g. `IND-42`
    pub reference_id: String,
    /// Unauthenticated free text
    pub performed_by: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

/// Ledger total versus live batch total for one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemReconciliation {
    pub item_id: i64,
    pub batch_total: i64,
    pub ledger_total: i64,
    pub balanced: bool,
}

impl ItemReconciliation {
    pub fn new(item_id: i64, batch_total: i64, ledger_total: i64) -> Self {
        Self {
            item_id,
            batch_total,
            ledger_total,
            balanced: batch_total == ledger_total,
        }
    }
}

/// Sum of quantity changes across ledger rows
pub fn ledger_total(transactions: &[InventoryTransaction]) -> i64 {
    transactions.iter().map(|t| t.quantity_change).sum()
}
