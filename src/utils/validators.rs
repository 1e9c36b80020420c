// Input validation helpers shared by the operation adapters

use chrono::Utc;

use crate::constants::{self, limits};
use crate::utils::time::parse_iso8601;

/// Split and validate a comma-separated marketplace id list.
///
/// Returns the trimmed ids on success or the offending ids on failure, so
/// callers can report every bad entry at once.
pub fn validate_marketplace_ids(raw: &str) -> Result<Vec<String>, Vec<String>> {
    if raw.trim().is_empty() {
        return Err(vec!["marketplace_ids cannot be empty".to_string()]);
    }

    let ids: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).collect();
    let invalid: Vec<String> = ids
        .iter()
        .filter(|id| !constants::is_valid_marketplace_id(id))
        .cloned()
        .collect();

    if invalid.is_empty() {
        Ok(ids)
    } else {
        Err(invalid)
    }
}

pub fn is_iso8601_date(value: &str) -> bool {
    parse_iso8601(value).is_some()
}

pub fn is_valid_order_status(status: &str) -> bool {
    constants::ORDER_STATUSES.contains(&status)
}

pub fn is_valid_fulfillment_type(value: &str) -> bool {
    constants::FULFILLMENT_TYPES.contains(&value.to_ascii_uppercase().as_str())
}

/// SKUs must be non-empty and free of characters the flat-file formats reject.
pub fn is_valid_sku(sku: &str) -> bool {
    if sku.trim().is_empty() {
        return false;
    }
    !sku.chars().any(|c| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
}

pub fn is_valid_handling_time(days: i64) -> bool {
    (limits::MIN_HANDLING_TIME_DAYS..=limits::MAX_HANDLING_TIME_DAYS).contains(&days)
}

/// Restock dates must parse and lie in the future.
pub fn is_valid_restock_date(value: &str) -> bool {
    match parse_iso8601(value) {
        Some(dt) => dt > Utc::now(),
        None => false,
    }
}

pub fn is_valid_quantity(quantity: i64) -> bool {
    quantity >= 0
}

/// Price strings travel as decimals ("69.98"); reject anything that does not
/// parse to a non-negative number.
pub fn is_valid_price(value: &str) -> bool {
    match value.parse::<f64>() {
        Ok(p) => p.is_finite() && p >= 0.0,
        Err(_) => false,
    }
}

/// A single entry in a bulk FBM inventory update.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BulkInventoryUpdate {
    pub sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub handling_time: Option<i64>,
    #[serde(default)]
    pub restock_date: Option<String>,
}

/// Validate every item of a bulk update, collecting all errors.
pub fn validate_bulk_updates(updates: &[BulkInventoryUpdate]) -> Vec<String> {
    let mut errors = Vec::new();

    if updates.is_empty() {
        errors.push("update list cannot be empty".to_string());
        return errors;
    }
    if updates.len() > limits::MAX_BULK_UPDATE_ITEMS {
        errors.push(format!(
            "too many updates: {} exceeds the maximum of {}",
            updates.len(),
            limits::MAX_BULK_UPDATE_ITEMS
        ));
    }

    for (idx, item) in updates.iter().enumerate() {
        if !is_valid_sku(&item.sku) {
            errors.push(format!("item {}: invalid SKU", idx));
        }
        if !is_valid_quantity(item.quantity) {
            errors.push(format!("item {}: quantity cannot be negative", idx));
        }
        if let Some(ht) = item.handling_time {
            if !is_valid_handling_time(ht) {
                errors.push(format!("item {}: handling time must be 1-30 days", idx));
            }
        }
        if let Some(ref rd) = item.restock_date {
            if !is_valid_restock_date(rd) {
                errors.push(format!("item {}: restock date must be in the future", idx));
            }
        }
    }

    errors
}
