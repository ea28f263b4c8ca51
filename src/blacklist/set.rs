//! Account-set store for the Poison policy. No amounts, only membership.

use std::collections::BTreeSet;

use alloy_primitives::Address;
use serde_json::Value;

use crate::types::NULL_ADDRESS;

#[derive(Debug, Default)]
pub struct SetBlacklist {
    accounts: BTreeSet<Address>,
}

impl SetBlacklist {
    pub fn add(&mut self, account: Address) {
        if account == NULL_ADDRESS {
            return;
        }
        self.accounts.insert(account);
    }

    pub fn remove(&mut self, account: Address) {
        self.accounts.remove(&account);
    }

    pub fn contains(&self, account: Address) -> bool {
        self.accounts.contains(&account)
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.accounts.iter().copied().collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.accounts
                .iter()
                .map(|account| Value::String(account.to_checksum(None)))
                .collect(),
        )
    }

    pub fn load_json(&mut self, value: &Value) -> eyre::Result<()> {
        let list = value
            .as_array()
            .ok_or_else(|| eyre::eyre!("set snapshot must be an array"))?;
        let mut accounts = BTreeSet::new();
        for entry in list {
            let s = entry
                .as_str()
                .ok_or_else(|| eyre::eyre!("set snapshot entry {entry} is not a string"))?;
            accounts.insert(s.parse::<Address>()?);
        }
        self.accounts = accounts;
        Ok(())
    }
}
