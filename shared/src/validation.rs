//! Validation utilities for stock inputs
//!
//! Wire dates arrive as `YYYY-MM-DD` and are stored as midnight UTC.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

// ============================================================================
// Dates
// ============================================================================

/// Parse an ISO-8601 date-only string into a UTC timestamp at midnight
pub fn parse_iso_date(value: &str) -> Result<DateTime<Utc>, &'static str> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| "Date must be in YYYY-MM-DD format")?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or("Date must be in YYYY-MM-DD format")?;
    Ok(Utc.from_utc_datetime(&midnight))
}

/// Check if an expiry has passed
pub fn is_expired(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expiry < now
}

// ============================================================================
// Quantities
// ============================================================================

/// Validate an on-hand quantity (zero allowed)
pub fn validate_stock_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity < 0 {
        return Err("Quantity cannot be negative");
    }
    Ok(())
}

/// Validate a requested quantity (must be positive)
pub fn validate_requested_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Stock is low when the total falls below the reorder threshold
pub fn is_low_stock(total_quantity: i64, threshold: i64) -> bool {
    total_quantity < threshold
}

// ============================================================================
// Names
// ============================================================================

/// Normalise an item name for storage and cross-service lookup.
///
/// Only surrounding whitespace is removed; matching stays exact and
/// case-sensitive.
pub fn normalize_item_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Item name cannot be empty");
    }
    Ok(trimmed.to_string())
}

/// Validate a batch number
pub fn validate_batch_number(batch_number: &str) -> Result<(), &'static str> {
    if batch_number.trim().is_empty() {
        return Err("Batch number cannot be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_iso_date_valid() {
        let parsed = parse_iso_date("2025-06-01").unwrap();
        assert_eq!(parsed.year(), 2025);
        assert_eq!(parsed.month(), 6);
        assert_eq!(parsed.day(), 1);
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_iso_date_trims() {
        assert!(parse_iso_date(" 2025-01-01 ").is_ok());
    }

    #[test]
    fn test_parse_iso_date_invalid() {
        assert!(parse_iso_date("01/06/2025").is_err());
        assert!(parse_iso_date("2025-13-01").is_err());
        assert!(parse_iso_date("2025-02-30").is_err());
        assert!(parse_iso_date("").is_err());
    }

    #[test]
    fn test_is_expired() {
        let expiry = parse_iso_date("2025-01-01").unwrap();
        let before = parse_iso_date("2024-12-31").unwrap();
        let after = parse_iso_date("2025-01-02").unwrap();
        assert!(!is_expired(expiry, before));
        assert!(is_expired(expiry, after));
    }

    #[test]
    fn test_quantity_validation() {
        assert!(validate_stock_quantity(0).is_ok());
        assert!(validate_stock_quantity(-1).is_err());
        assert!(validate_requested_quantity(1).is_ok());
        assert!(validate_requested_quantity(0).is_err());
    }

    #[test]
    fn test_low_stock() {
        assert!(is_low_stock(4, 5));
        assert!(!is_low_stock(5, 5));
        assert!(!is_low_stock(0, 0));
    }

    #[test]
    fn test_normalize_item_name() {
        assert_eq!(normalize_item_name("  Amoxicillin ").unwrap(), "Amoxicillin");
        assert_eq!(normalize_item_name("amoxicillin").unwrap(), "amoxicillin");
        assert!(normalize_item_name("   ").is_err());
    }

    #[test]
    fn test_batch_number() {
        assert!(validate_batch_number("B-001").is_ok());
        assert!(validate_batch_number(" ").is_err());
    }
}
