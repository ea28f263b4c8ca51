//! Per-currency tainted-amount store for Haircut, Seniority and Reversed
//! Seniority.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};
use serde_json::{Map, Value};

use crate::types::{Currency, NULL_ADDRESS};

use super::parse_amount;

/// The reserved key marking which token balances were snapshotted wholesale.
const ALL_KEY: &str = "all";

#[derive(Debug, Default)]
struct DictAccount {
    currencies: BTreeMap<Currency, U256>,
    /// Present for seed accounts: tokens whose full balance is already tainted.
    fully_tainted: Option<BTreeSet<Address>>,
}

impl DictAccount {
    fn is_empty(&self) -> bool {
        self.currencies.is_empty() && self.fully_tainted.is_none()
    }
}

#[derive(Debug, Default)]
pub struct DictBlacklist {
    accounts: BTreeMap<Address, DictAccount>,
}

impl DictBlacklist {
    pub fn add(&mut self, account: Address, currency: Currency, amount: U256) {
        if account == NULL_ADDRESS || amount.is_zero() {
            return;
        }
        let entry = self.accounts.entry(account).or_default();
        let value = entry.currencies.entry(currency).or_insert(U256::ZERO);
        *value = value.saturating_add(amount);
    }

    /// Deduct up to `amount`, returning how much was actually removed.
    pub fn remove(&mut self, account: Address, amount: U256, currency: Currency) -> U256 {
        let Some(entry) = self.accounts.get_mut(&account) else {
            return U256::ZERO;
        };
        let Some(value) = entry.currencies.get_mut(&currency) else {
            return U256::ZERO;
        };

        let removed = amount.min(*value);
        *value -= removed;
        if value.is_zero() {
            entry.currencies.remove(&currency);
            if entry.is_empty() {
                self.accounts.remove(&account);
            }
        }
        removed
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

    pub fn value(&self, account: Address, currency: Currency) -> U256 {
        self.accounts
            .get(&account)
            .and_then(|entry| entry.currencies.get(&currency))
            .copied()
            .unwrap_or_default()
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
                entry
                    .currencies
                    .iter()
                    .map(move |(currency, value)| (*account, *currency, *value))
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (account, entry) in &self.accounts {
            let mut obj = Map::new();
            for (currency, value) in &entry.currencies {
                obj.insert(currency.to_string(), Value::String(value.to_string()));
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
            .ok_or_else(|| eyre::eyre!("dict snapshot must be an object"))?;
        let mut accounts = BTreeMap::new();
        for (account_str, entry_value) in root {
            let account: Address = account_str.parse()?;
            let obj = entry_value
                .as_object()
                .ok_or_else(|| eyre::eyre!("entry for {account_str} must be an object"))?;
            let mut entry = DictAccount::default();
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
                    let amount = parse_amount(val)?;
                    if !amount.is_zero() {
                        entry.currencies.insert(currency, amount);
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
