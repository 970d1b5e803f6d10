//! Budget ledger state and operations.
//!
//! A [`Ledger`] is the context every entry point works through: it carries
//! the environment, the admin, the active policies and the two persistent
//! maps (payments by id, spenders by registry key). Each operation performs
//! all of its checks before its first write.

use soroban_sdk::{log, Address, Env, String, Vec};

use crate::auth;
use crate::stable_map::StableBTreeMap;
use crate::types::{
    Budget, DataKey, DuplicatePolicy, LedgerConfig, LedgerEvents, Payment, Spender, UpdatePolicy,
    INSTANCE_TTL_EXTEND_TO, INSTANCE_TTL_THRESHOLD, MAX_PAYMENT_ID_LEN, MAX_PAYMENT_VALUE_SIZE,
    MAX_SPENDER_VALUE_SIZE, PAYMENTS_MEMORY_ID, PERCENT_SCALE, SPENDERS_MEMORY_ID,
};
use crate::validation::{validate_amount, validate_category, validate_payment_id};
use crate::LedgerError;

/// Encoded width of a spender registry key.
const SPENDER_KEY_SIZE: u32 = 4;

pub struct Ledger {
    env: Env,
    admin: Address,
    config: LedgerConfig,
    payments: StableBTreeMap<String, Payment>,
    spenders: StableBTreeMap<u32, Spender>,
}

impl Ledger {
    /// Writes the initial state. Fails if the ledger already exists.
    pub fn initialize(env: &Env, admin: Address) -> Result<(), LedgerError> {
        let storage = env.storage().instance();
        if storage.has(&DataKey::Admin) {
            return Err(LedgerError::AlreadyInitialized);
        }

        storage.set(&DataKey::Admin, &admin);
        storage.set(&DataKey::Budget, &Budget { total: 0 });
        storage.set(&DataKey::Config, &LedgerConfig::default());
        storage.set(&DataKey::SpenderCount, &0u32);
        storage.extend_ttl(INSTANCE_TTL_THRESHOLD, INSTANCE_TTL_EXTEND_TO);

        LedgerEvents::initialized(env, &admin);
        Ok(())
    }

    pub fn load(env: &Env) -> Result<Self, LedgerError> {
        let storage = env.storage().instance();
        let admin: Address = storage
            .get(&DataKey::Admin)
            .ok_or(LedgerError::NotInitialized)?;
        let config: LedgerConfig = storage.get(&DataKey::Config).unwrap_or_default();

        let payments = StableBTreeMap::init(
            env,
            PAYMENTS_MEMORY_ID,
            MAX_PAYMENT_ID_LEN,
            MAX_PAYMENT_VALUE_SIZE,
        )?;
        let spenders = StableBTreeMap::init(
            env,
            SPENDERS_MEMORY_ID,
            SPENDER_KEY_SIZE,
            MAX_SPENDER_VALUE_SIZE,
        )?;

        Ok(Self {
            env: env.clone(),
            admin,
            config,
            payments,
            spenders,
        })
    }

    pub fn admin(&self) -> Address {
        self.admin.clone()
    }

    pub fn config(&self) -> LedgerConfig {
        self.config.clone()
    }

    // ---------------------------------------------------------------------
    // Authorization
    // ---------------------------------------------------------------------

    pub fn is_admin(&self, who: &Address) -> bool {
        auth::is_admin(&self.admin, who)
    }

    pub fn is_spender(&self, who: &Address) -> Result<bool, LedgerError> {
        auth::is_spender(&self.spenders, who)
    }

    pub fn set_config(&mut self, caller: &Address, config: LedgerConfig) -> Result<(), LedgerError> {
        auth::require_admin(&self.admin, caller)?;

        self.env.storage().instance().set(&DataKey::Config, &config);
        self.touch();
        LedgerEvents::config_set(&self.env, &config);
        self.config = config;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Spender registry
    // ---------------------------------------------------------------------

    /// Registers `address` under the next registry key and returns the key.
    pub fn add_spender(&mut self, caller: &Address, address: Address) -> Result<u32, LedgerError> {
        auth::require_admin(&self.admin, caller)?;

        let last: u32 = self
            .env
            .storage()
            .instance()
            .get(&DataKey::SpenderCount)
            .unwrap_or(0);
        let key = last.checked_add(1).ok_or(LedgerError::CapacityExceeded)?;

        let spender = Spender {
            key,
            address: address.clone(),
            added_at: self.env.ledger().timestamp(),
        };
        self.spenders.insert(key, spender)?;
        self.env
            .storage()
            .instance()
            .set(&DataKey::SpenderCount, &key);
        self.touch();

        LedgerEvents::spender_added(&self.env, key, &address);
        Ok(key)
    }

    pub fn delete_spender(&mut self, caller: &Address, key: u32) -> Result<Spender, LedgerError> {
        auth::require_admin(&self.admin, caller)?;

        let removed = self.spenders.remove(&key)?.ok_or(LedgerError::NotFound)?;
        self.touch();

        LedgerEvents::spender_removed(&self.env, key, &removed.address);
        Ok(removed)
    }

    pub fn get_spender(&self, key: u32) -> Result<Spender, LedgerError> {
        self.spenders.get(&key)?.ok_or(LedgerError::NotFound)
    }

    pub fn list_spenders(&self) -> Result<Vec<Spender>, LedgerError> {
        let mut spenders = Vec::new(&self.env);
        for spender in self.spenders.values() {
            spenders.push_back(spender?);
        }
        Ok(spenders)
    }

    pub fn spender_count(&self) -> u32 {
        self.spenders.len()
    }

    // ---------------------------------------------------------------------
    // Budget
    // ---------------------------------------------------------------------

    pub fn budget(&self) -> Budget {
        self.env
            .storage()
            .instance()
            .get(&DataKey::Budget)
            .unwrap_or(Budget { total: 0 })
    }

    /// Replaces the budget. A budget below the outstanding total is allowed
    /// and blocks further spending until payments shrink or it is raised.
    pub fn set_budget(&mut self, caller: &Address, total: i128) -> Result<Budget, LedgerError> {
        auth::require_admin(&self.admin, caller)?;
        validate_amount(total)?;

        let previous = self.budget();
        let budget = Budget { total };
        self.env.storage().instance().set(&DataKey::Budget, &budget);
        self.touch();

        LedgerEvents::budget_set(&self.env, previous.total, total);
        Ok(budget)
    }

    // ---------------------------------------------------------------------
    // Payments
    // ---------------------------------------------------------------------

    pub fn create_payment(
        &mut self,
        caller: &Address,
        id: String,
        amount: i128,
        category: Option<String>,
    ) -> Result<Payment, LedgerError> {
        auth::require_admin_or_spender(&self.admin, &self.spenders, caller)?;
        validate_payment_id(&id)?;
        validate_amount(amount)?;
        validate_category(&category)?;

        let outstanding = match (self.payments.get(&id)?, self.config.duplicate_policy) {
            (Some(_), DuplicatePolicy::Reject) => {
                log!(&self.env, "payment id already taken", id);
                return Err(LedgerError::DuplicatePayment);
            }
            (Some(existing), DuplicatePolicy::Upsert) => self
                .total_payments()?
                .checked_sub(existing.amount)
                .ok_or(LedgerError::ArithmeticOverflow)?,
            (None, _) => self.total_payments()?,
        };
        self.ensure_within_budget(outstanding, amount)?;

        let payment = Payment {
            id: id.clone(),
            amount,
            created_at: self.env.ledger().timestamp(),
            updated_at: None,
            category,
        };
        self.payments.insert(id, payment.clone())?;
        self.touch();

        LedgerEvents::payment_created(&self.env, caller, &payment);
        Ok(payment)
    }

    /// Changes the amount of an existing payment. The payment's current
    /// amount is left out of the total before the new one is checked.
    pub fn update_payment(
        &mut self,
        caller: &Address,
        id: String,
        amount: i128,
    ) -> Result<Payment, LedgerError> {
        if self.config.update_policy == UpdatePolicy::AdminOnly {
            auth::require_admin(&self.admin, caller)?;
        }
        validate_amount(amount)?;

        let mut payment = self.payments.get(&id)?.ok_or(LedgerError::NotFound)?;
        let outstanding = self
            .total_payments()?
            .checked_sub(payment.amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.ensure_within_budget(outstanding, amount)?;

        let previous = payment.amount;
        payment.amount = amount;
        payment.updated_at = Some(self.env.ledger().timestamp());
        self.payments.insert(id, payment.clone())?;
        self.touch();

        LedgerEvents::payment_updated(&self.env, caller, previous, &payment);
        Ok(payment)
    }

    pub fn delete_payment(&mut self, caller: &Address, id: String) -> Result<Payment, LedgerError> {
        auth::require_admin(&self.admin, caller)?;

        let removed = self.payments.remove(&id)?.ok_or(LedgerError::NotFound)?;
        self.touch();

        LedgerEvents::payment_deleted(&self.env, caller, &removed);
        Ok(removed)
    }

    pub fn read_payment(&self, id: String) -> Result<Payment, LedgerError> {
        self.payments.get(&id)?.ok_or(LedgerError::NotFound)
    }

    /// All payments, ordered by id.
    pub fn list_payments(&self) -> Result<Vec<Payment>, LedgerError> {
        let mut payments = Vec::new(&self.env);
        for payment in self.payments.values() {
            payments.push_back(payment?);
        }
        Ok(payments)
    }

    pub fn payment_count(&self) -> u32 {
        self.payments.len()
    }

    pub fn filter_by_category(&self, category: String) -> Result<Vec<Payment>, LedgerError> {
        let mut matching = Vec::new(&self.env);
        for payment in self.payments.values() {
            let payment = payment?;
            if payment.category.as_ref() == Some(&category) {
                matching.push_back(payment);
            }
        }
        Ok(matching)
    }

    /// Stable sort by amount; payments with equal amounts keep id order.
    pub fn sort_by_amount(&self, ascending: bool) -> Result<Vec<Payment>, LedgerError> {
        let mut sorted: Vec<Payment> = Vec::new(&self.env);
        for payment in self.payments.values() {
            let payment = payment?;
            let mut index = sorted.len();
            while index > 0 {
                let before = sorted.get_unchecked(index - 1).amount;
                let out_of_order = if ascending {
                    before > payment.amount
                } else {
                    before < payment.amount
                };
                if !out_of_order {
                    break;
                }
                index -= 1;
            }
            sorted.insert(index, payment);
        }
        Ok(sorted)
    }

    // ---------------------------------------------------------------------
    // Aggregates
    // ---------------------------------------------------------------------

    pub fn total_payments(&self) -> Result<i128, LedgerError> {
        let mut total: i128 = 0;
        for payment in self.payments.values() {
            total = total
                .checked_add(payment?.amount)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }
        Ok(total)
    }

    /// Budget usage in basis points, truncated. A zero budget has no usage
    /// ratio and reports `ZeroBudget`.
    pub fn usage_percentage(&self) -> Result<i128, LedgerError> {
        let budget = self.budget();
        if budget.total == 0 {
            return Err(LedgerError::ZeroBudget);
        }
        let scaled = self
            .total_payments()?
            .checked_mul(PERCENT_SCALE)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(scaled / budget.total)
    }

    /// Budget left to spend; negative when the budget was lowered below the
    /// outstanding total.
    pub fn remaining_budget(&self) -> Result<i128, LedgerError> {
        self.budget()
            .total
            .checked_sub(self.total_payments()?)
            .ok_or(LedgerError::ArithmeticOverflow)
    }

    fn ensure_within_budget(&self, outstanding: i128, amount: i128) -> Result<(), LedgerError> {
        let budget = self.budget();
        let projected = outstanding
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        if projected > budget.total {
            log!(&self.env, "budget exceeded", projected, budget.total);
            return Err(LedgerError::BudgetExceeded);
        }
        Ok(())
    }

    fn touch(&self) {
        self.env
            .storage()
            .instance()
            .extend_ttl(INSTANCE_TTL_THRESHOLD, INSTANCE_TTL_EXTEND_TO);
    }
}
