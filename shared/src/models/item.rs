//! Item (logical product) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{Batch, BatchDetailsInput};

/// A logical medicine product. Stock lives in its batches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    /// Unique among live items of one service
    pub name: String,
    pub description: String,
    /// Reorder threshold; stock below this is "low"
    pub threshold: i64,
    /// Unit label, e.g. "Tablets", "Vials"
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Item with its live batches and the derived total.
///
/// `total_quantity` is always recomputed from `batches`; it is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemWithStock {
    #[serde(flatten)]
    pub item: Item,
    pub total_quantity: i64,
    pub batches: Vec<Batch>,
}

impl ItemWithStock {
    pub fn new(item: Item, batches: Vec<Batch>) -> Self {
        let total_quantity = total_quantity(&batches);
        Self {
            item,
            total_quantity,
            batches,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.total_quantity < self.item.threshold
    }
}

/// Sum of on-hand quantity across batches
pub fn total_quantity(batches: &[Batch]) -> i64 {
    batches.iter().map(|b| b.quantity).sum()
}

/// Input for creating an item
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateItemInput {
    #[validate(length(min = 1, max = 200, message = "Item name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Threshold cannot be negative"))]
    pub threshold: i64,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Optional first batch, recorded as "Initial Stock"
    #[validate]
    pub initial_batch: Option<BatchDetailsInput>,
}

/// Input for updating item metadata
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateItemInput {
    #[validate(length(min = 1, max = 200, message = "Item name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "Threshold cannot be negative"))]
    pub threshold: Option<i64>,
    pub unit: Option<String>,
}

fn default_unit() -> String {
    "Units".to_string()
}
