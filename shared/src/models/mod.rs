//! Domain models for medicine stock tracking

mod batch;
mod indent;
mod item;
mod ledger;

pub use batch::*;
pub use indent::*;
pub use item::*;
pub use ledger::*;

use thiserror::Error;

/// A wire string that is not a member of a closed enumeration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
