//! Validation logic for ledger inputs.

use soroban_sdk::String;

use crate::types::{MAX_CATEGORY_LEN, MAX_PAYMENT_ID_LEN};
use crate::LedgerError;

/// Amounts and budgets may be zero but never negative.
pub fn is_valid_amount(amount: i128) -> bool {
    amount >= 0
}

/// A label is non-empty and at most `max_len` bytes.
pub fn is_valid_label(label: &String, max_len: u32) -> bool {
    let len = label.len();
    len > 0 && len <= max_len
}

pub fn validate_amount(amount: i128) -> Result<(), LedgerError> {
    if !is_valid_amount(amount) {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

pub fn validate_payment_id(id: &String) -> Result<(), LedgerError> {
    if !is_valid_label(id, MAX_PAYMENT_ID_LEN) {
        return Err(LedgerError::InvalidPaymentId);
    }
    Ok(())
}

pub fn validate_category(category: &Option<String>) -> Result<(), LedgerError> {
    match category {
        Some(category) if !is_valid_label(category, MAX_CATEGORY_LEN) => {
            Err(LedgerError::InvalidCategory)
        }
        _ => Ok(()),
    }
}
