//! Data types, storage keys and events for the budget ledger.

use soroban_sdk::{contracttype, symbol_short, Address, Env, String};

/// Maximum length of a payment id, in bytes.
pub const MAX_PAYMENT_ID_LEN: u32 = 64;

/// Maximum length of a payment category, in bytes.
pub const MAX_CATEGORY_LEN: u32 = 32;

/// Storage namespace of the payment map.
pub const PAYMENTS_MEMORY_ID: u32 = 0;

/// Storage namespace of the spender registry.
pub const SPENDERS_MEMORY_ID: u32 = 1;

/// Encoded value bound for payment records.
pub const MAX_PAYMENT_VALUE_SIZE: u32 = 1024;

/// Encoded value bound for spender records.
pub const MAX_SPENDER_VALUE_SIZE: u32 = 256;

/// Usage percentages are reported in basis points (1% = 100).
pub const PERCENT_SCALE: i128 = 10_000;

/// Ledgers before expiry at which instance storage is extended.
pub const INSTANCE_TTL_THRESHOLD: u32 = 17_280;

/// Instance storage is extended to this many ledgers (~30 days).
pub const INSTANCE_TTL_EXTEND_TO: u32 = 518_400;

/// The single spending budget.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Budget {
    pub total: i128,
}

/// Stored payment record.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Payment {
    /// Caller-supplied unique id
    pub id: String,
    /// Amount charged against the budget
    pub amount: i128,
    /// Ledger timestamp of creation
    pub created_at: u64,
    /// Ledger timestamp of the last amount change
    pub updated_at: Option<u64>,
    /// Optional spending category (e.g. "travel", "office")
    pub category: Option<String>,
}

/// Registry entry for an identity allowed to create payments.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Spender {
    /// Registry key, never reused
    pub key: u32,
    pub address: Address,
    pub added_at: u64,
}

/// What `create_payment` does when the id is already taken.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DuplicatePolicy {
    /// Fail with `DuplicatePayment`
    Reject,
    /// Replace the stored record.
    ///
    /// Replacement goes through `create_payment`, so any spender can
    /// overwrite an existing payment even under `UpdatePolicy::AdminOnly`.
    Upsert,
}

/// Who may call `update_payment`.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdatePolicy {
    /// Only the admin
    AdminOnly,
    /// Any authenticated caller
    Relaxed,
}

/// Ledger policies, replaceable by the admin.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerConfig {
    pub duplicate_policy: DuplicatePolicy,
    pub update_policy: UpdatePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            update_policy: UpdatePolicy::AdminOnly,
        }
    }
}

/// Instance storage keys. The payment and spender maps live in persistent
/// storage under their own keys (see `stable_map::MapKey`).
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataKey {
    /// Admin address
    Admin,
    /// Current budget
    Budget,
    /// Ledger policies
    Config,
    /// Last assigned spender key
    SpenderCount,
}

/// Events emitted by the budget ledger.
pub struct LedgerEvents;

impl LedgerEvents {
    pub fn initialized(env: &Env, admin: &Address) {
        env.events().publish((symbol_short!("init"),), admin.clone());
    }

    pub fn config_set(env: &Env, config: &LedgerConfig) {
        let topics = (symbol_short!("config"), symbol_short!("set"));
        env.events().publish(
            topics,
            (config.duplicate_policy, config.update_policy),
        );
    }

    pub fn spender_added(env: &Env, key: u32, spender: &Address) {
        let topics = (symbol_short!("spender"), symbol_short!("added"), key);
        env.events().publish(topics, spender.clone());
    }

    pub fn spender_removed(env: &Env, key: u32, spender: &Address) {
        let topics = (symbol_short!("spender"), symbol_short!("removed"), key);
        env.events().publish(topics, spender.clone());
    }

    pub fn budget_set(env: &Env, previous: i128, total: i128) {
        let topics = (symbol_short!("budget"), symbol_short!("set"));
        env.events().publish(topics, (previous, total));
    }

    pub fn payment_created(env: &Env, caller: &Address, payment: &Payment) {
        let topics = (symbol_short!("payment"), symbol_short!("created"));
        env.events().publish(
            topics,
            (payment.id.clone(), caller.clone(), payment.amount),
        );
    }

    pub fn payment_updated(env: &Env, caller: &Address, previous: i128, payment: &Payment) {
        let topics = (symbol_short!("payment"), symbol_short!("updated"));
        env.events().publish(
            topics,
            (payment.id.clone(), caller.clone(), previous, payment.amount),
        );
    }

    pub fn payment_deleted(env: &Env, caller: &Address, payment: &Payment) {
        let topics = (symbol_short!("payment"), symbol_short!("deleted"));
        env.events().publish(
            topics,
            (payment.id.clone(), caller.clone(), payment.amount),
        );
    }
}
