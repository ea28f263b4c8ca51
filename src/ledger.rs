//! Block-scoped view of account balances.
//!
//! The on-chain balance of an `(account, currency)` pair is fetched once, the
//! first time a policy reads it; afterwards the ledger applies the block's own
//! value movements locally so policies see a coherent intra-block state
//! without further node traffic. One ledger spans one block, so fee credits
//! to the miner accumulate across its transactions.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use tracing::warn;

use crate::chain::ChainSource;
use crate::types::Currency;

#[derive(Debug, Default)]
struct Entry {
    credited: U256,
    debited: U256,
    /// On-chain balance, fetched on first read.
    base: Option<U256>,
}

#[derive(Debug, Default)]
pub struct TempLedger {
    entries: HashMap<(Address, Currency), Entry>,
}

impl TempLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increase(&mut self, account: Address, currency: Currency, amount: U256) {
        let entry = self.entries.entry((account, currency)).or_default();
        entry.credited = entry.credited.saturating_add(amount);
    }

    pub fn decrease(&mut self, account: Address, currency: Currency, amount: U256) {
        let entry = self.entries.entry((account, currency)).or_default();
        entry.debited = entry.debited.saturating_add(amount);
    }

    /// The account's balance as seen at this point of the block. Issues at
    /// most one balance query per `(account, currency)` per block.
    pub async fn balance<C: ChainSource>(
        &mut self,
        chain: &C,
        account: Address,
        currency: Currency,
        block: u64,
    ) -> eyre::Result<U256> {
        let needs_fetch = self
            .entries
            .get(&(account, currency))
            .map_or(true, |entry| entry.base.is_none());

        if needs_fetch {
            let fetched = chain.balance(account, currency, block).await?;
            self.entries
                .entry((account, currency))
                .or_default()
                .base = Some(fetched);
        }

        let entry = &self.entries[&(account, currency)];
        let base = entry.base.unwrap_or_default();
        let total = base.saturating_add(entry.credited);
        if entry.debited > total {
            warn!(
                account = %account,
                currency = %currency,
                "block-local balance fell below zero, clamping"
            );
            return Ok(U256::ZERO);
        }
        Ok(total - entry.debited)
    }
}
