//! Inflow-queue store for the FIFO policy.
//!
//! Every tainted inflow is kept as a `[taint, total]` pair in arrival order;
//! outflows consume pairs from the head, so the oldest taint leaves first and
//! untainted inflow portions shield nothing. The sum of `total` across the
//! queue is the tracked part of the account's balance.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use alloy_primitives::{Address, U256};
use serde_json::{Map, Value};

use crate::types::{Currency, NULL_ADDRESS};

use super::parse_amount;

const ALL_KEY: &str = "all";

/// One recorded inflow: `taint <= total`, `total > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaintedInflow {
    pub taint: U256,
    pub total: U256,
}

#[derive(Debug, Default)]
struct FifoAccount {
    currencies: BTreeMap<Currency, VecDeque<TaintedInflow>>,
    fully_tainted: Option<BTreeSet<Address>>,
}

impl FifoAccount {
    fn is_empty(&self) -> bool {
        self.currencies.is_empty() && self.fully_tainted.is_none()
    }
}

#[derive(Debug, Default)]
pub struct FifoBlacklist {
    accounts: BTreeMap<Address, FifoAccount>,
}

impl FifoBlacklist {
    /// Record an inflow of `total` gross units carrying `taint` tainted ones.
    /// Consecutive untainted inflows coalesce into one pair.
    pub fn add(&mut self, account: Address, currency: Currency, taint: U256, total: U256) {
        if account == NULL_ADDRESS || total.is_zero() {
            return;
        }
        debug_assert!(taint <= total);

        let queue = self
            .accounts
            .entry(account)
            .or_default()
            .currencies
            .entry(currency)
            .or_default();

        if taint.is_zero() {
            if let Some(last) = queue.back_mut() {
                if last.taint.is_zero() {
                    last.total = last.total.saturating_add(total);
                    return;
                }
            }
        }
        queue.push_back(TaintedInflow { taint, total });
    }

    /// Consume `amount` of tracked inflows from the head of the queue and
    /// return the taint carried by the consumed portion.
    pub fn remove(&mut self, account: Address, amount: U256, currency: Currency) -> U256 {
        let Some(entry) = self.accounts.get_mut(&account) else {
            return U256::ZERO;
        };
        let Some(queue) = entry.currencies.get_mut(&currency) else {
            return U256::ZERO;
        };

        let mut remaining = amount;
        let mut removed_taint = U256::ZERO;

        while let Some(head) = queue.front_mut() {
            let consumed = remaining.min(head.total);
            let remaining_taint = head.taint.min(head.total - consumed);
            removed_taint += head.taint - remaining_taint;

            head.taint = remaining_taint;
            head.total -= consumed;
            if head.total.is_zero() {
                queue.pop_front();
            }

            remaining -= consumed;
            if remaining.is_zero() {
                break;
            }
        }

        if queue.is_empty() {
            entry.currencies.remove(&currency);
            if entry.is_empty() {
                self.accounts.remove(&account);
            }
        }
        removed_taint
    }

    pub fn is_blacklisted(&self, account: Address, currency: Option<Currency>) -> bool {
        match currency {
            None => self.accounts.contains_key(&account),
            Some(currency) => self
                .accounts
                .get(&account)
                .is_some_and(|entry| entry.currencies.contains_key(&currency)),
        }
    }

    /// Sum of taint portions across the queue.
    pub fn value(&self, account: Address, currency: Currency) -> U256 {
        self.queue(account, currency)
            .map(|queue| queue.iter().fold(U256::ZERO, |acc, p| acc + p.taint))
            .unwrap_or_default()
    }

    /// Sum of gross inflow amounts across the queue.
    pub fn tracked_value(&self, account: Address, currency: Currency) -> U256 {
        self.queue(account, currency)
            .map(|queue| queue.iter().fold(U256::ZERO, |acc, p| acc + p.total))
            .unwrap_or_default()
    }

    fn queue(&self, account: Address, currency: Currency) -> Option<&VecDeque<TaintedInflow>> {
        self.accounts
            .get(&account)
            .and_then(|entry| entry.currencies.get(&currency))
    }

    pub fn add_account(&mut self, account: Address) {
        if account == NULL_ADDRESS {
            return;
        }
        let entry = self.accounts.entry(account).or_default();
        entry.fully_tainted = Some(BTreeSet::new());
    }

    pub fn has_full_taint_flag(&self, account: Address) -> bool {
        self.accounts
            .get(&account)
            .is_some_and(|entry| entry.fully_tainted.is_some())
    }

    pub fn is_fully_tainted(&self, account: Address, token: Address) -> bool {
        self.accounts
            .get(&account)
            .and_then(|entry| entry.fully_tainted.as_ref())
            .is_some_and(|all| all.contains(&token))
    }

    pub fn mark_fully_tainted(&mut self, account: Address, token: Address) {
        if account == NULL_ADDRESS {
            return;
        }
        let entry = self.accounts.entry(account).or_default();
        entry.fully_tainted.get_or_insert_with(BTreeSet::new).insert(token);
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.accounts.keys().copied().collect()
    }

    pub fn entries(&self) -> Vec<(Address, Currency, U256)> {
        self.accounts
            .iter()
            .flat_map(|(account, entry)| {
                entry.currencies.iter().map(move |(currency, queue)| {
                    let value = queue.iter().fold(U256::ZERO, |acc, p| acc + p.taint);
                    (*account, *currency, value)
                })
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (account, entry) in &self.accounts {
            let mut obj = Map::new();
            for (currency, queue) in &entry.currencies {
                let pairs = queue
                    .iter()
                    .map(|p| {
                        Value::Array(vec![
                            Value::String(p.taint.to_string()),
                            Value::String(p.total.to_string()),
                        ])
                    })
                    .collect();
                obj.insert(currency.to_string(), Value::Array(pairs));
            }
            if let Some(all) = &entry.fully_tainted {
                obj.insert(
                    ALL_KEY.to_string(),
                    Value::Array(
                        all.iter()
                            .map(|token| Value::String(token.to_checksum(None)))
                            .collect(),
                    ),
                );
            }
            root.insert(account.to_checksum(None), Value::Object(obj));
        }
        Value::Object(root)
    }

    pub fn load_json(&mut self, value: &Value) -> eyre::Result<()> {
        let root = value
            .as_object()
            .ok_or_else(|| eyre::eyre!("fifo snapshot must be an object"))?;
        let mut accounts = BTreeMap::new();
        for (account_str, entry_value) in root {
            let account: Address = account_str.parse()?;
            let obj = entry_value
                .as_object()
                .ok_or_else(|| eyre::eyre!("entry for {account_str} must be an object"))?;
            let mut entry = FifoAccount::default();
            for (key, val) in obj {
                if key == ALL_KEY {
                    let list = val
                        .as_array()
                        .ok_or_else(|| eyre::eyre!("\"all\" for {account_str} must be an array"))?;
                    let mut all = BTreeSet::new();
                    for token in list {
                        let s = token
                            .as_str()
                            .ok_or_else(|| eyre::eyre!("token entry {token} is not a string"))?;
                        all.insert(s.parse::<Address>()?);
                    }
                    entry.fully_tainted = Some(all);
                } else {
                    let currency: Currency = key.parse()?;
                    let pairs = val
                        .as_array()
                        .ok_or_else(|| eyre::eyre!("queue for {key} must be an array"))?;
                    let mut queue = VecDeque::with_capacity(pairs.len());
                    for pair in pairs {
                        let items = pair
                            .as_array()
                            .filter(|items| items.len() == 2)
                            .ok_or_else(|| eyre::eyre!("queue pair {pair} must have two items"))?;
                        queue.push_back(TaintedInflow {
                            taint: parse_amount(&items[0])?,
                            total: parse_amount(&items[1])?,
                        });
                    }
                    if !queue.is_empty() {
                        entry.currencies.insert(currency, queue);
                    }
                }
            }
            if !entry.is_empty() {
                accounts.insert(account, entry);
            }
        }
        self.accounts = accounts;
        Ok(())
    }
}
