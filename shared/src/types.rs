//! Common types used across the services

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default number of audit rows returned
pub const DEFAULT_TRANSACTION_LIMIT: u32 = 100;
/// Upper bound on audit rows per request
pub const MAX_TRANSACTION_LIMIT: u32 = 1000;

/// Query parameters for the audit log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub limit: Option<u32>,
}

impl TransactionQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
            .clamp(1, MAX_TRANSACTION_LIMIT)
    }
}

/// Headline numbers for the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_items: i64,
    /// Sum of quantity x MRP over live batches
    pub total_value: Decimal,
    pub low_stock_items: i64,
    pub expired_batches: i64,
}
