//! Blacklist store variants.
//!
//! Poison tracks a bare account set, the amount policies track per-currency
//! tainted values, and FIFO tracks an ordered queue of tainted inflows per
//! currency. All variants purge entries that reach zero and suppress writes
//! against the null address, so no mint/burn sequence can leave taint there.

mod dict;
mod fifo;
mod set;

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde_json::Value;

use crate::types::Currency;

pub use dict::DictBlacklist;
pub use fifo::{FifoBlacklist, TaintedInflow};
pub use set::SetBlacklist;

/// Aggregate figures reported at each metrics tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMetrics {
    pub unique_accounts: usize,
    pub unique_currencies: usize,
}

/// The store backing a policy.
#[derive(Debug)]
pub enum Store {
    Set(SetBlacklist),
    Dict(DictBlacklist),
    Fifo(FifoBlacklist),
}

impl Store {
    /// Add tainted value. `total` is the gross inflow amount and only
    /// meaningful for the FIFO variant; it defaults to `amount`.
    pub fn add(&mut self, account: Address, currency: Currency, amount: U256, total: Option<U256>) {
        match self {
            Store::Set(set) => set.add(account),
            Store::Dict(dict) => dict.add(account, currency, amount),
            Store::Fifo(fifo) => fifo.add(account, currency, amount, total.unwrap_or(amount)),
        }
    }

    /// Deduct up to `amount` of tainted value and report how much taint was
    /// actually removed. The Set variant tracks no amounts and reports None;
    /// its removals erase the account outright.
    pub fn remove(&mut self, account: Address, amount: U256, currency: Currency) -> Option<U256> {
        match self {
            Store::Set(set) => {
                set.remove(account);
                None
            }
            Store::Dict(dict) => Some(dict.remove(account, amount, currency)),
            Store::Fifo(fifo) => Some(fifo.remove(account, amount, currency)),
        }
    }

    pub fn is_blacklisted(&self, account: Address, currency: Option<Currency>) -> bool {
        match self {
            Store::Set(set) => set.contains(account),
            Store::Dict(dict) => dict.is_blacklisted(account, currency),
            Store::Fifo(fifo) => fifo.is_blacklisted(account, currency),
        }
    }

    /// Tainted value for the pair; zero when absent. Always zero for Set.
    pub fn value(&self, account: Address, currency: Currency) -> U256 {
        match self {
            Store::Set(_) => U256::ZERO,
            Store::Dict(dict) => dict.value(account, currency),
            Store::Fifo(fifo) => fifo.value(account, currency),
        }
    }

    /// Sum of gross inflow amounts still queued (FIFO only; zero otherwise).
    pub fn tracked_value(&self, account: Address, currency: Currency) -> U256 {
        match self {
            Store::Fifo(fifo) => fifo.tracked_value(account, currency),
            _ => U256::ZERO,
        }
    }

    /// Register a seed account. For the amount-tracking variants this also
    /// arms the full-taint flag so token balances get snapshotted on first
    /// contact.
    pub fn add_account(&mut self, account: Address) {
        match self {
            Store::Set(set) => set.add(account),
            Store::Dict(dict) => dict.add_account(account),
            Store::Fifo(fifo) => fifo.add_account(account),
        }
    }

    pub fn has_full_taint_flag(&self, account: Address) -> bool {
        match self {
            Store::Set(_) => false,
            Store::Dict(dict) => dict.has_full_taint_flag(account),
            Store::Fifo(fifo) => fifo.has_full_taint_flag(account),
        }
    }

    pub fn is_fully_tainted(&self, account: Address, token: Address) -> bool {
        match self {
            Store::Set(_) => false,
            Store::Dict(dict) => dict.is_fully_tainted(account, token),
            Store::Fifo(fifo) => fifo.is_fully_tainted(account, token),
        }
    }

    pub fn mark_fully_tainted(&mut self, account: Address, token: Address) {
        match self {
            Store::Set(_) => {}
            Store::Dict(dict) => dict.mark_fully_tainted(account, token),
            Store::Fifo(fifo) => fifo.mark_fully_tainted(account, token),
        }
    }

    pub fn accounts(&self) -> Vec<Address> {
        match self {
            Store::Set(set) => set.accounts(),
            Store::Dict(dict) => dict.accounts(),
            Store::Fifo(fifo) => fifo.accounts(),
        }
    }

    /// Every `(account, currency, tainted value)` triple. Empty for Set.
    pub fn entries(&self) -> Vec<(Address, Currency, U256)> {
        match self {
            Store::Set(_) => Vec::new(),
            Store::Dict(dict) => dict.entries(),
            Store::Fifo(fifo) => fifo.entries(),
        }
    }

    /// Total tainted value per currency. Empty for Set; Poison totals are
    /// computed from live balances by the policy layer instead.
    pub fn amounts(&self) -> BTreeMap<Currency, U256> {
        let mut totals = BTreeMap::new();
        for (_, currency, value) in self.entries() {
            let slot = totals.entry(currency).or_insert(U256::ZERO);
            *slot = slot.saturating_add(value);
        }
        totals
    }

    pub fn metrics(&self) -> StoreMetrics {
        let entries = self.entries();
        let mut currencies: Vec<Currency> = entries.iter().map(|(_, c, _)| *c).collect();
        currencies.sort_unstable();
        currencies.dedup();
        StoreMetrics {
            unique_accounts: self.accounts().len(),
            unique_currencies: currencies.len(),
        }
    }

    /// The `n` accounts holding the most taint summed over `currencies`,
    /// highest first. Empty for Set.
    pub fn top_accounts(&self, n: usize, currencies: &[Currency]) -> Vec<(Address, U256)> {
        let mut sums: BTreeMap<Address, U256> = BTreeMap::new();
        for (account, currency, value) in self.entries() {
            if currencies.contains(&currency) {
                let slot = sums.entry(account).or_insert(U256::ZERO);
                *slot = slot.saturating_add(value);
            }
        }
        let mut ranked: Vec<(Address, U256)> = sums.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    pub fn to_json(&self) -> Value {
        match self {
            Store::Set(set) => set.to_json(),
            Store::Dict(dict) => dict.to_json(),
            Store::Fifo(fifo) => fifo.to_json(),
        }
    }

    /// Replace the contents from a snapshot previously produced by
    /// [`Store::to_json`] of the same variant.
    pub fn load_json(&mut self, value: &Value) -> eyre::Result<()> {
        match self {
            Store::Set(set) => set.load_json(value),
            Store::Dict(dict) => dict.load_json(value),
            Store::Fifo(fifo) => fifo.load_json(value),
        }
    }
}

/// Parse a snapshot amount: decimal strings are canonical, plain numbers are
/// accepted for hand-written fixtures.
pub(crate) fn parse_amount(value: &Value) -> eyre::Result<U256> {
    match value {
        Value::String(s) => s
            .parse::<U256>()
            .map_err(|e| eyre::eyre!("bad amount {s:?}: {e}")),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| eyre::eyre!("bad amount {n}")),
        other => Err(eyre::eyre!("bad amount {other}")),
    }
}
