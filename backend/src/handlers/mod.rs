//! HTTP handlers

pub mod health;
pub mod indent;
pub mod inventory;
pub mod reconciliation;

pub use health::*;
pub use indent::*;
pub use inventory::*;
pub use reconciliation::*;
