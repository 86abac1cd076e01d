//! Shared types and logic for the medicine stock services
//!
//! This crate contains the domain models, the FEFO batch allocator and
//! input validation shared by the hospital and pharmacy services and the
//! browser (via WASM).

pub mod allocation;
pub mod models;
pub mod types;
pub mod validation;

pub use allocation::*;
pub use models::*;
pub use types::*;
pub use validation::*;
