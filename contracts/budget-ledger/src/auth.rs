//! Role checks for ledger callers.
//!
//! The caller has already proven control of its address with
//! `require_auth`; these checks decide what that address may do.

use soroban_sdk::Address;

use crate::stable_map::StableBTreeMap;
use crate::types::Spender;
use crate::LedgerError;

pub fn is_admin(admin: &Address, who: &Address) -> bool {
    admin == who
}

/// Linear scan; the registry is expected to stay small.
pub fn is_spender(spenders: &StableBTreeMap<u32, Spender>, who: &Address) -> Result<bool, LedgerError> {
    for spender in spenders.values() {
        if spender?.address == *who {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn require_admin(admin: &Address, caller: &Address) -> Result<(), LedgerError> {
    if !is_admin(admin, caller) {
        return Err(LedgerError::Unauthorized);
    }
    Ok(())
}

pub fn require_admin_or_spender(
    admin: &Address,
    spenders: &StableBTreeMap<u32, Spender>,
    caller: &Address,
) -> Result<(), LedgerError> {
    if is_admin(admin, caller) || is_spender(spenders, caller)? {
        return Ok(());
    }
    Err(LedgerError::Unauthorized)
}
