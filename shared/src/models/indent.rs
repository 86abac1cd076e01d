//! Indent (cross-service stock request) models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ParseEnumError;

/// Lifecycle of an indent.
///
/// `PENDING -> PROCESSING -> DISPATCHED -> FULFILLED`, with `REJECTED`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndentStatus {
    Pending,
    Processing,
    Dispatched,
    Fulfilled,
    Rejected,
}

impl IndentStatus {
    pub const ALL: [IndentStatus; 5] = [
        IndentStatus::Pending,
        IndentStatus::Processing,
        IndentStatus::Dispatched,
        IndentStatus::Fulfilled,
        IndentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndentStatus::Pending => "PENDING",
            IndentStatus::Processing => "PROCESSING",
            IndentStatus::Dispatched => "DISPATCHED",
            IndentStatus::Fulfilled => "FULFILLED",
            IndentStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IndentStatus::Fulfilled | IndentStatus::Rejected)
    }

    /// Status that must hold before moving to `self`.
    ///
    /// `None` for `PENDING` (creation only) and `REJECTED` (any non-terminal).
    pub fn required_predecessor(&self) -> Option<IndentStatus> {
        match self {
            IndentStatus::Processing => Some(IndentStatus::Pending),
            IndentStatus::Dispatched => Some(IndentStatus::Processing),
            IndentStatus::Fulfilled => Some(IndentStatus::Dispatched),
            IndentStatus::Pending | IndentStatus::Rejected => None,
        }
    }
}

impl fmt::Display for IndentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

/// A stock request from a pharmacy to the hospital.
///
/// The item is referenced by name: the two services do not share ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Indent {
    pub id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub status: IndentStatus,
    #[serde(default)]
    pub pharmacy_id: String,
    /// Serialized allocation plan (JSON array of [`DispatchEntry`])
    #[serde(default)]
    pub dispatch_details: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Indent {
    /// Ledger reference for stock moved by this indent
    pub fn reference(&self) -> String {
        indent_reference(self.id)
    }

    pub fn dispatch_plan(&self) -> Result<Vec<DispatchEntry>, serde_json::Error> {
        decode_plan(&self.dispatch_details)
    }
}

pub fn indent_reference(indent_id: i64) -> String {
    format!("IND-{}", indent_id)
}

/// One line of a dispatch plan. Field names are part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchEntry {
    pub batch_number: String,
    pub quantity: i64,
    pub expiry_date: DateTime<Utc>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub mrp: Option<Decimal>,
    #[serde(default)]
    pub location: String,
}

pub fn encode_plan(entries: &[DispatchEntry]) -> String {
    // Vec<DispatchEntry> always serializes
    serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored plan. An empty string or `null` is an empty plan.
pub fn decode_plan(raw: &str) -> Result<Vec<DispatchEntry>, serde_json::Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Option<Vec<DispatchEntry>> = serde_json::from_str(raw)?;
    Ok(entries.unwrap_or_default())
}

/// Input for raising an indent
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateIndentInput {
    #[validate(length(min = 1, max = 200, message = "Item name is required"))]
    pub item_name: String,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i64,
    #[serde(default)]
    pub pharmacy_id: String,
}

/// Body of the status-update endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndentStatusUpdate {
    pub status: String,
}
