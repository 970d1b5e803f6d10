//! # Budget Ledger Contract
//!
//! A Soroban smart contract that records payments against a single budget
//! and guarantees the recorded payments never add up to more than it.
//!
//! ## Features
//!
//! - **Budget Invariant**: Every create and update is checked against the
//!   current budget before anything is written
//! - **Roles**: One admin fixed at initialization, plus a registry of
//!   spenders allowed to create payments
//! - **Durable Storage**: Payments and spenders live in persistent B-trees
//!   (`StableBTreeMap`) with ordered iteration
//! - **Derived Views**: Totals, usage percentage, remaining budget, category
//!   filters and amount-sorted listings
//! - **Event Emission**: Every committed change publishes an event
//!
//! ## Access
//!
//! | Operation | Who |
//! |---|---|
//! | `add_spender`, `delete_spender`, `set_budget`, `delete_payment`, `set_config` | admin |
//! | `update_payment` | admin, or any caller under `UpdatePolicy::Relaxed` |
//! | `create_payment` | admin or spender |
//! | everything else | anyone |

#![no_std]

mod auth;
mod ledger;
mod stable_map;
mod storable;
mod types;
mod validation;

use soroban_sdk::{contract, contracterror, contractimpl, Address, Env, String, Vec};

pub use crate::ledger::Ledger;
pub use crate::stable_map::{MapError, StableBTreeMap};
pub use crate::types::{
    Budget, DataKey, DuplicatePolicy, LedgerConfig, LedgerEvents, Payment, Spender, UpdatePolicy,
    MAX_CATEGORY_LEN, MAX_PAYMENT_ID_LEN, PERCENT_SCALE,
};

/// Error codes for the budget ledger contract.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LedgerError {
    /// `initialize` was already called
    AlreadyInitialized = 1,
    /// Contract not initialized
    NotInitialized = 2,
    /// Caller is not authorized
    Unauthorized = 3,
    /// No payment or spender under that key
    NotFound = 4,
    /// The change would push payments over the budget
    BudgetExceeded = 5,
    /// A payment with that id already exists
    DuplicatePayment = 6,
    /// Amount or budget is negative
    InvalidAmount = 7,
    /// Payment id is empty or too long
    InvalidPaymentId = 8,
    /// Category is empty or too long
    InvalidCategory = 9,
    /// Usage percentage requested with a zero budget
    ZeroBudget = 10,
    /// An aggregate overflowed
    ArithmeticOverflow = 11,
    /// A storage bound or counter is exhausted
    CapacityExceeded = 12,
    /// Stored state is inconsistent
    Corrupt = 13,
}

impl From<MapError> for LedgerError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::CapacityExceeded => LedgerError::CapacityExceeded,
            MapError::Corrupt => LedgerError::Corrupt,
        }
    }
}

#[contract]
pub struct BudgetLedgerContract;

#[contractimpl]
impl BudgetLedgerContract {
    /// Initializes the contract with an admin address and a zero budget.
    ///
    /// # Errors
    /// * `AlreadyInitialized` - If called more than once
    pub fn initialize(env: Env, admin: Address) -> Result<(), LedgerError> {
        Ledger::initialize(&env, admin)
    }

    /// Returns the admin address.
    pub fn get_admin(env: Env) -> Result<Address, LedgerError> {
        Ok(Ledger::load(&env)?.admin())
    }

    /// Returns the active ledger policies.
    pub fn get_config(env: Env) -> Result<LedgerConfig, LedgerError> {
        Ok(Ledger::load(&env)?.config())
    }

    /// Replaces the ledger policies.
    ///
    /// # Arguments
    /// * `env` - The contract environment
    /// * `caller` - The address calling this function (must be admin)
    /// * `config` - Duplicate-id and update authorization policies
    pub fn set_config(env: Env, caller: Address, config: LedgerConfig) -> Result<(), LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.set_config(&caller, config)
    }

    /// Returns true if `who` is the admin.
    pub fn is_admin(env: Env, who: Address) -> Result<bool, LedgerError> {
        Ok(Ledger::load(&env)?.is_admin(&who))
    }

    /// Returns true if `who` is a registered spender.
    pub fn is_spender(env: Env, who: Address) -> Result<bool, LedgerError> {
        Ledger::load(&env)?.is_spender(&who)
    }

    /// Registers a spender.
    ///
    /// # Arguments
    /// * `env` - The contract environment
    /// * `caller` - The address calling this function (must be admin)
    /// * `spender` - The address allowed to create payments
    ///
    /// # Returns
    /// * `u32` - The registry key assigned to the spender
    ///
    /// # Events Emitted
    /// * `spender_added` - With the key and address
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is not admin
    /// * `CapacityExceeded` - If the registry key space is exhausted
    pub fn add_spender(env: Env, caller: Address, spender: Address) -> Result<u32, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.add_spender(&caller, spender)
    }

    /// Removes a spender by registry key and returns the removed entry.
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is not admin
    /// * `NotFound` - If no spender holds that key
    pub fn delete_spender(env: Env, caller: Address, key: u32) -> Result<Spender, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.delete_spender(&caller, key)
    }

    /// Retrieves a spender by registry key.
    pub fn get_spender(env: Env, key: u32) -> Result<Spender, LedgerError> {
        Ledger::load(&env)?.get_spender(key)
    }

    /// Lists registered spenders in key order.
    pub fn list_spenders(env: Env) -> Result<Vec<Spender>, LedgerError> {
        Ledger::load(&env)?.list_spenders()
    }

    /// Returns the number of registered spenders.
    pub fn spender_count(env: Env) -> Result<u32, LedgerError> {
        Ok(Ledger::load(&env)?.spender_count())
    }

    /// Replaces the budget total.
    ///
    /// The new total is not checked against existing payments; lowering it
    /// below the outstanding total blocks new spending until it is raised.
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is not admin
    /// * `InvalidAmount` - If `amount` is negative
    pub fn set_budget(env: Env, caller: Address, amount: i128) -> Result<Budget, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.set_budget(&caller, amount)
    }

    /// Returns the current budget.
    pub fn get_budget(env: Env) -> Result<Budget, LedgerError> {
        Ok(Ledger::load(&env)?.budget())
    }

    /// Records a payment against the budget.
    ///
    /// # Arguments
    /// * `env` - The contract environment
    /// * `caller` - The address calling this function (admin or spender)
    /// * `id` - Unique payment id (1 to 64 bytes)
    /// * `amount` - Non-negative amount
    /// * `category` - Optional spending category (1 to 32 bytes)
    ///
    /// # Events Emitted
    /// * `payment_created` - With the id, caller and amount
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is neither admin nor spender
    /// * `BudgetExceeded` - If the payment would exceed the budget
    /// * `DuplicatePayment` - If the id exists and duplicates are rejected
    /// * `InvalidPaymentId`, `InvalidAmount`, `InvalidCategory` - On bad input
    pub fn create_payment(
        env: Env,
        caller: Address,
        id: String,
        amount: i128,
        category: Option<String>,
    ) -> Result<Payment, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.create_payment(&caller, id, amount, category)
    }

    /// Retrieves a payment by id.
    pub fn read_payment(env: Env, id: String) -> Result<Payment, LedgerError> {
        Ledger::load(&env)?.read_payment(id)
    }

    /// Changes the amount of a payment and stamps `updated_at`.
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is not admin under `UpdatePolicy::AdminOnly`
    /// * `NotFound` - If no payment has that id
    /// * `BudgetExceeded` - If the new amount would exceed the budget
    pub fn update_payment(
        env: Env,
        caller: Address,
        id: String,
        amount: i128,
    ) -> Result<Payment, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.update_payment(&caller, id, amount)
    }

    /// Deletes a payment and returns it.
    ///
    /// # Errors
    /// * `Unauthorized` - If caller is not admin
    /// * `NotFound` - If no payment has that id
    pub fn delete_payment(env: Env, caller: Address, id: String) -> Result<Payment, LedgerError> {
        caller.require_auth();
        Ledger::load(&env)?.delete_payment(&caller, id)
    }

    /// Lists all payments ordered by id.
    pub fn list_payments(env: Env) -> Result<Vec<Payment>, LedgerError> {
        Ledger::load(&env)?.list_payments()
    }

    /// Returns the number of stored payments.
    pub fn payment_count(env: Env) -> Result<u32, LedgerError> {
        Ok(Ledger::load(&env)?.payment_count())
    }

    /// Lists payments tagged with `category`.
    pub fn filter_payments_by_category(
        env: Env,
        category: String,
    ) -> Result<Vec<Payment>, LedgerError> {
        Ledger::load(&env)?.filter_by_category(category)
    }

    /// Lists payments by amount; ascending unless `ascending` is `Some(false)`.
    pub fn sort_payments_by_amount(
        env: Env,
        ascending: Option<bool>,
    ) -> Result<Vec<Payment>, LedgerError> {
        Ledger::load(&env)?.sort_by_amount(ascending.unwrap_or(true))
    }

    /// Returns the sum of all payment amounts.
    pub fn get_total_payments(env: Env) -> Result<i128, LedgerError> {
        Ledger::load(&env)?.total_payments()
    }

    /// Returns budget usage in basis points (`10_000` = 100%).
    ///
    /// # Errors
    /// * `ZeroBudget` - If the budget is zero
    pub fn get_budget_usage_percentage(env: Env) -> Result<i128, LedgerError> {
        Ledger::load(&env)?.usage_percentage()
    }

    /// Returns the budget minus the payment total; negative if overspent.
    pub fn get_remaining_budget(env: Env) -> Result<i128, LedgerError> {
        Ledger::load(&env)?.remaining_budget()
    }
}
