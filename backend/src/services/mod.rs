//! Business logic services for the medicine stock services

pub mod indent;
pub mod inventory;
pub mod reconciliation;
pub mod stock;

pub use indent::IndentService;
pub use inventory::InventoryService;
pub use reconciliation::{ReceiptReport, ReconciliationService};
pub use stock::{Attribution, StockService};
