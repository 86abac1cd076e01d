//! WebAssembly module for the medicine stock frontend
//!
//! Provides client-side computation for:
//! - FEFO allocation previews
//! - Stock value and expiry counts
//! - Offline input validation

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Allocation preview returned to JavaScript
#[derive(Debug, Serialize)]
struct AllocationPreview {
    allocations: Vec<DispatchEntry>,
    allocated: i64,
    remainder: i64,
}

fn parse_batches(batches_json: &str) -> Result<Vec<Batch>, JsValue> {
    serde_json::from_str(batches_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid batches JSON: {}", e)))
}

fn browser_now() -> DateTime<Utc> {
    let millis = js_sys::Date::now() as i64;
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn expired_count(batches: &[Batch], now: DateTime<Utc>) -> u32 {
    batches.iter().filter(|b| b.holds_expired_stock(now)).count() as u32
}

/// Preview which batches would fill `target` units, earliest expiry first
#[wasm_bindgen]
pub fn preview_allocation(target: i64, batches_json: &str) -> Result<String, JsValue> {
    let batches = parse_batches(batches_json)?;
    let plan = shared::allocation::plan(target, &batches);
    let preview = AllocationPreview {
        allocations: plan.dispatch_entries(),
        allocated: plan.allocated(),
        remainder: plan.remainder,
    };
    serde_json::to_string(&preview).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Stock value at MRP across batches
#[wasm_bindgen]
pub fn calculate_stock_value(batches_json: &str) -> Result<f64, JsValue> {
    let batches = parse_batches(batches_json)?;
    let total: Decimal = batches.iter().map(Batch::value).sum();
    Ok(total.round_dp(2).to_f64().unwrap_or(0.0))
}

/// Number of batches with stock past their expiry, by the browser clock
#[wasm_bindgen]
pub fn count_expired_batches(batches_json: &str) -> Result<u32, JsValue> {
    let batches = parse_batches(batches_json)?;
    Ok(expired_count(&batches, browser_now()))
}

/// Check if an item total is below its reorder threshold
#[wasm_bindgen]
pub fn is_item_low_stock(total_quantity: i64, threshold: i64) -> bool {
    is_low_stock(total_quantity, threshold)
}

/// Validate a `YYYY-MM-DD` expiry date
#[wasm_bindgen]
pub fn validate_expiry_date(value: &str) -> bool {
    parse_iso_date(value).is_ok()
}

/// Validate an indent request before it is sent
#[wasm_bindgen]
pub fn validate_indent_request(item_name: &str, quantity: i64) -> Result<(), JsValue> {
    normalize_item_name(item_name).map_err(JsValue::from_str)?;
    validate_requested_quantity(quantity).map_err(JsValue::from_str)
}
