//! Batch (physical lot) models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Location tag given to batches ingested from a supplier's dispatch
pub const RECEIVED_INDENT_LOCATION: &str = "Received-Indent";

/// A physical lot of an item with its own quantity and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub item_id: i64,
    pub batch_number: String,
    /// On-hand quantity, never negative
    pub quantity: i64,
    pub expiry_date: DateTime<Utc>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub mrp: Option<Decimal>,
    /// Rack/shelf identifier
    pub location: String,
    /// Indent reference (`IND-<id>`) for batches received from a supplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date < now
    }

    /// Expired and still holding stock
    pub fn holds_expired_stock(&self, now: DateTime<Utc>) -> bool {
        self.quantity > 0 && self.is_expired(now)
    }

    /// Stock value at MRP; batches without MRP count as zero
    pub fn value(&self) -> Decimal {
        self.mrp
            .map(|mrp| mrp * Decimal::from(self.quantity))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Batch fields supplied by a client. Dates are `YYYY-MM-DD`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BatchDetailsInput {
    #[validate(length(min = 1, max = 100, message = "Batch number is required"))]
    pub batch_number: String,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i64,
    pub expiry_date: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub mrp: Option<Decimal>,
    #[serde(default)]
    pub location: String,
}

/// Input for adding a batch to an existing item
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatchInput {
    pub item_id: i64,
    #[serde(flatten)]
    #[validate]
    pub details: BatchDetailsInput,
}

/// Input for editing a batch.
///
/// A quantity change is recorded in the ledger as a correction.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateBatchInput {
    #[validate(length(min = 1, max = 100, message = "Batch number cannot be empty"))]
    pub batch_number: Option<String>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: Option<i64>,
    pub expiry_date: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub mrp: Option<Decimal>,
    pub location: Option<String>,
    /// Free-text justification stored on the correction row
    pub notes: Option<String>,
}
