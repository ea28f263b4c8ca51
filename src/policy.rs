//! The taint-transfer rules.
//!
//! One tagged variant per policy and a single dispatch in `transfer_taint` /
//! `process_gas_fee`; shared orchestration lives in the propagator, which
//! composes this with the sequencer, ledger and store.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blacklist::{DictBlacklist, FifoBlacklist, SetBlacklist, Store};
use crate::chain::ChainSource;
use crate::ledger::TempLedger;
use crate::types::{mul_div_clamped, Currency, NULL_ADDRESS, WETH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    Poison,
    Haircut,
    Seniority,
    ReversedSeniority,
    Fifo,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Poison => "poison",
            PolicyKind::Haircut => "haircut",
            PolicyKind::Seniority => "seniority",
            PolicyKind::ReversedSeniority => "reversed_seniority",
            PolicyKind::Fifo => "fifo",
        }
    }

    fn new_store(&self) -> Store {
        match self {
            PolicyKind::Poison => Store::Set(SetBlacklist::default()),
            PolicyKind::Fifo => Store::Fifo(FifoBlacklist::default()),
            _ => Store::Dict(DictBlacklist::default()),
        }
    }

    /// Poison works on set membership alone and never touches the ledger.
    pub fn uses_ledger(&self) -> bool {
        !matches!(self, PolicyKind::Poison)
    }
}

/// A policy plus its store and the set of permanently tainted accounts.
#[derive(Debug)]
pub struct TaintPolicy {
    kind: PolicyKind,
    store: Store,
    permanent: BTreeSet<Address>,
}

impl TaintPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        Self {
            kind,
            store: kind.new_store(),
            permanent: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Mark an account as an inexhaustible taint source: every outflow
    /// carries its full sent amount regardless of balances.
    pub fn permanently_taint(&mut self, account: Address) {
        self.permanent.insert(account);
    }

    pub fn is_permanently_tainted(&self, account: Address) -> bool {
        self.permanent.contains(&account)
    }

    /// Seed an account: snapshot its current ETH and wrapped-native balances
    /// as tainted and arm the full-taint flag for later token contact.
    pub async fn seed_account<C: ChainSource>(
        &mut self,
        chain: &C,
        account: Address,
        block: u64,
    ) -> eyre::Result<()> {
        self.store.add_account(account);
        if matches!(self.kind, PolicyKind::Poison) {
            info!(account = %account, "seeded blacklist account");
            return Ok(());
        }

        let eth = chain.eth_balance(account, block).await?;
        if !eth.is_zero() {
            self.store.add(account, Currency::Eth, eth, Some(eth));
        }
        self.fully_taint_token(chain, account, WETH, block).await?;
        info!(account = %account, eth = %eth, "seeded blacklist account");
        Ok(())
    }

    /// Taint the account's entire current balance of `token` and record the
    /// token so the snapshot is never taken twice.
    pub async fn fully_taint_token<C: ChainSource>(
        &mut self,
        chain: &C,
        account: Address,
        token: Address,
        block: u64,
    ) -> eyre::Result<()> {
        if matches!(self.kind, PolicyKind::Poison) {
            return Ok(());
        }
        if self.store.is_fully_tainted(account, token) {
            return Ok(());
        }

        let balance = chain
            .balance(account, Currency::Token(token), block)
            .await?;
        if !balance.is_zero() {
            self.store
                .add(account, Currency::Token(token), balance, Some(balance));
        }
        self.store.mark_fully_tainted(account, token);

        let name = chain.token_name(token).await;
        debug!(
            account = %account,
            token = %token,
            name = name.as_deref().unwrap_or("?"),
            amount = %balance,
            "tainted full token balance"
        );
        Ok(())
    }

    /// Move taint for a send of `amount_sent` from `from` to `to`, returning
    /// the tainted amount that moved. `to` is None when the value is burned
    /// outright (fee burn); the null address likewise receives nothing.
    /// `currency_out` differs from `currency_in` only for wrapped-native
    /// conversions, where the same account swaps ETH and WETH.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_taint<C: ChainSource>(
        &mut self,
        chain: &C,
        ledger: &mut TempLedger,
        block: u64,
        from: Address,
        to: Option<Address>,
        amount_sent: U256,
        currency_in: Currency,
        currency_out: Currency,
    ) -> eyre::Result<U256> {
        match self.kind {
            PolicyKind::Poison => {
                if !self.store.is_blacklisted(from, None) {
                    return Ok(U256::ZERO);
                }
                let Some(to) = to else {
                    return Ok(U256::ZERO);
                };
                if to == NULL_ADDRESS || self.store.is_blacklisted(to, None) {
                    return Ok(U256::ZERO);
                }
                self.store.add(to, currency_out, U256::ZERO, None);
                debug!(account = %to, tainted_by = %from, "account poisoned");
                Ok(U256::from(1u64))
            }

            PolicyKind::Haircut => {
                if !self.store.is_blacklisted(from, Some(currency_in)) {
                    return Ok(U256::ZERO);
                }
                let transferred = if self.is_permanently_tainted(from) {
                    amount_sent
                } else {
                    let taint = self.store.value(from, currency_in);
                    let balance = ledger.balance(chain, from, currency_in, block).await?;
                    if balance.is_zero() {
                        warn!(
                            account = %from,
                            currency = %currency_in,
                            taint = %taint,
                            "taint outstanding against a zero balance, dropping it"
                        );
                        self.store.remove(from, taint, currency_in);
                        return Ok(U256::ZERO);
                    }
                    let share = mul_div_clamped(amount_sent, taint, balance);
                    if share.is_zero() {
                        return Ok(U256::ZERO);
                    }
                    self.store
                        .remove(from, share, currency_in)
                        .unwrap_or_default()
                };
                self.credit(from, to, transferred, currency_in, currency_out, amount_sent);
                Ok(transferred)
            }

            PolicyKind::Seniority => {
                if !self.store.is_blacklisted(from, Some(currency_in)) {
                    return Ok(U256::ZERO);
                }
                let transferred = if self.is_permanently_tainted(from) {
                    amount_sent
                } else {
                    let taken = amount_sent.min(self.store.value(from, currency_in));
                    if taken.is_zero() {
                        return Ok(U256::ZERO);
                    }
                    self.store
                        .remove(from, taken, currency_in)
                        .unwrap_or_default()
                };
                self.credit(from, to, transferred, currency_in, currency_out, amount_sent);
                Ok(transferred)
            }

            PolicyKind::ReversedSeniority => {
                if !self.store.is_blacklisted(from, Some(currency_in)) {
                    return Ok(U256::ZERO);
                }
                let transferred = if self.is_permanently_tainted(from) {
                    amount_sent
                } else {
                    let taint = self.store.value(from, currency_in);
                    let balance = ledger.balance(chain, from, currency_in, block).await?;
                    // Only the part of the send that dips into the tainted
                    // tail moves taint; untainted inflows shield it.
                    let shielded = balance.saturating_sub(amount_sent);
                    let exposed = taint.saturating_sub(shielded);
                    if exposed.is_zero() {
                        return Ok(U256::ZERO);
                    }
                    self.store
                        .remove(from, exposed, currency_in)
                        .unwrap_or_default()
                };
                self.credit(from, to, transferred, currency_in, currency_out, amount_sent);
                Ok(transferred)
            }

            PolicyKind::Fifo => {
                let transferred = if self.is_permanently_tainted(from) {
                    amount_sent
                } else if self.store.is_blacklisted(from, Some(currency_in)) {
                    let balance = ledger.balance(chain, from, currency_in, block).await?;
                    let tracked = self.store.tracked_value(from, currency_in);
                    let sent_tracked = if tracked >= balance {
                        if tracked > balance {
                            warn!(
                                account = %from,
                                currency = %currency_in,
                                tracked = %tracked,
                                balance = %balance,
                                "tracked inflows exceed the live balance"
                            );
                        }
                        amount_sent.saturating_add(tracked - balance)
                    } else {
                        // the untracked slice of the balance leaves first
                        amount_sent.saturating_sub(balance - tracked)
                    };
                    if sent_tracked.is_zero() {
                        U256::ZERO
                    } else {
                        self.store
                            .remove(from, sent_tracked, currency_in)
                            .unwrap_or_default()
                    }
                } else {
                    U256::ZERO
                };

                // The receiver records the gross inflow whenever taint arrived
                // or it is already tracking this currency, so later outflows
                // consume inflows in arrival order.
                if let Some(to) = to {
                    if to != NULL_ADDRESS
                        && (!transferred.is_zero()
                            || self.store.is_blacklisted(to, Some(currency_in)))
                    {
                        self.store.add(to, currency_out, transferred, Some(amount_sent));
                    }
                }
                if !transferred.is_zero() {
                    debug!(
                        from = %from,
                        to = ?to,
                        amount = %transferred,
                        total = %amount_sent,
                        currency = %currency_in,
                        "transferred taint"
                    );
                }
                Ok(transferred)
            }
        }
    }

    /// Process the fee of one transaction. Returns the tainted fee removed
    /// from the sender and the tainted portion credited to the miner.
    #[allow(clippy::too_many_arguments)]
    pub async fn process_gas_fee<C: ChainSource>(
        &mut self,
        chain: &C,
        ledger: &mut TempLedger,
        block: u64,
        sender: Address,
        miner: Address,
        total_fee: U256,
        miner_fee: U256,
    ) -> eyre::Result<(U256, U256)> {
        match self.kind {
            PolicyKind::Poison => {
                if !self.store.is_blacklisted(sender, None)
                    || self.store.is_blacklisted(miner, None)
                {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                self.store.add(miner, Currency::Eth, U256::ZERO, None);
                debug!(miner = %miner, tainted_by = %sender, "miner poisoned via fee");
                Ok((U256::from(1u64), U256::from(1u64)))
            }

            PolicyKind::Haircut => {
                if !self.store.is_blacklisted(sender, Some(Currency::Eth)) {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                let (tainted_fee, to_miner) = if self.is_permanently_tainted(sender) {
                    (total_fee, miner_fee)
                } else {
                    let taint = self.store.value(sender, Currency::Eth);
                    let balance = ledger.balance(chain, sender, Currency::Eth, block).await?;
                    if balance.is_zero() {
                        warn!(
                            account = %sender,
                            taint = %taint,
                            "fee taint outstanding against a zero balance, dropping it"
                        );
                        self.store.remove(sender, taint, Currency::Eth);
                        self.apply_fee_to_ledger(ledger, sender, miner, total_fee, miner_fee);
                        return Ok((U256::ZERO, U256::ZERO));
                    }
                    let fee = mul_div_clamped(total_fee, taint, balance);
                    let fee = self
                        .store
                        .remove(sender, fee, Currency::Eth)
                        .unwrap_or_default();
                    (fee, mul_div_clamped(miner_fee, taint, balance))
                };
                self.store.add(miner, Currency::Eth, to_miner, Some(to_miner));
                self.apply_fee_to_ledger(ledger, sender, miner, total_fee, miner_fee);
                self.log_fee(sender, miner, tainted_fee, to_miner);
                Ok((tainted_fee, to_miner))
            }

            PolicyKind::Seniority => {
                if !self.store.is_blacklisted(sender, Some(Currency::Eth)) {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                let (tainted_fee, to_miner) = if self.is_permanently_tainted(sender) {
                    (total_fee, miner_fee)
                } else {
                    // Both shares are capped by the same pre-debit taint: the
                    // miner's cut is a subset of the total fee, not of what
                    // remains after it.
                    let taint = self.store.value(sender, Currency::Eth);
                    let fee = total_fee.min(taint);
                    let to_miner = miner_fee.min(taint);
                    self.store.remove(sender, fee, Currency::Eth);
                    (fee, to_miner)
                };
                self.store.add(miner, Currency::Eth, to_miner, Some(to_miner));
                self.apply_fee_to_ledger(ledger, sender, miner, total_fee, miner_fee);
                self.log_fee(sender, miner, tainted_fee, to_miner);
                Ok((tainted_fee, to_miner))
            }

            PolicyKind::ReversedSeniority => {
                if !self.store.is_blacklisted(sender, Some(Currency::Eth)) {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                let (tainted_fee, to_miner) = if self.is_permanently_tainted(sender) {
                    (total_fee, miner_fee)
                } else {
                    let taint = self.store.value(sender, Currency::Eth);
                    let balance = ledger.balance(chain, sender, Currency::Eth, block).await?;
                    let shielded = balance.saturating_sub(total_fee);
                    let fee = taint.saturating_sub(shielded);
                    (fee, miner_fee.min(fee))
                };
                self.apply_fee_to_ledger(ledger, sender, miner, total_fee, miner_fee);
                if tainted_fee.is_zero() {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                self.store.remove(sender, tainted_fee, Currency::Eth);
                self.store.add(miner, Currency::Eth, to_miner, Some(to_miner));
                self.log_fee(sender, miner, tainted_fee, to_miner);
                Ok((tainted_fee, to_miner))
            }

            PolicyKind::Fifo => {
                if !self.store.is_blacklisted(sender, Some(Currency::Eth))
                    && !self.store.is_blacklisted(miner, Some(Currency::Eth))
                {
                    return Ok((U256::ZERO, U256::ZERO));
                }
                let to_miner = self
                    .transfer_taint(
                        chain,
                        ledger,
                        block,
                        sender,
                        Some(miner),
                        miner_fee,
                        Currency::Eth,
                        Currency::Eth,
                    )
                    .await?;
                ledger.increase(miner, Currency::Eth, miner_fee);
                ledger.decrease(sender, Currency::Eth, miner_fee);

                let burned = total_fee.saturating_sub(miner_fee);
                let burned_taint = self
                    .transfer_taint(
                        chain,
                        ledger,
                        block,
                        sender,
                        None,
                        burned,
                        Currency::Eth,
                        Currency::Eth,
                    )
                    .await?;
                ledger.decrease(sender, Currency::Eth, burned);

                let tainted_fee = to_miner.saturating_add(burned_taint);
                if !tainted_fee.is_zero() {
                    self.log_fee(sender, miner, tainted_fee, to_miner);
                }
                Ok((tainted_fee, to_miner))
            }
        }
    }

    /// Totals per currency. The Set store has no amounts, so Poison sums the
    /// live ETH and wrapped-native balances of the tainted set instead.
    pub async fn blacklisted_amounts<C: ChainSource>(
        &self,
        chain: &C,
        block: u64,
    ) -> eyre::Result<BTreeMap<Currency, U256>> {
        if !matches!(self.kind, PolicyKind::Poison) {
            return Ok(self.store.amounts());
        }

        let mut eth = U256::ZERO;
        let mut weth = U256::ZERO;
        for account in self.store.accounts() {
            eth = eth.saturating_add(chain.eth_balance(account, block).await?);
            weth = weth.saturating_add(
                chain
                    .balance(account, Currency::WRAPPED_NATIVE, block)
                    .await?,
            );
        }
        let mut amounts = BTreeMap::new();
        amounts.insert(Currency::Eth, eth);
        amounts.insert(Currency::WRAPPED_NATIVE, weth);
        Ok(amounts)
    }

    /// Credit the receiver side of a transfer, burning instead when the
    /// receiver is absent or the null address.
    fn credit(
        &mut self,
        from: Address,
        to: Option<Address>,
        transferred: U256,
        currency_in: Currency,
        currency_out: Currency,
        amount_sent: U256,
    ) {
        match to {
            None => {}
            Some(to) if to == NULL_ADDRESS => {
                debug!(
                    from = %from,
                    amount = %transferred,
                    total = %amount_sent,
                    currency = %currency_in,
                    "tainted tokens burned"
                );
            }
            Some(to) => {
                self.store.add(to, currency_out, transferred, Some(transferred));
                if currency_in == currency_out && !transferred.is_zero() {
                    debug!(
                        from = %from,
                        to = %to,
                        amount = %transferred,
                        total = %amount_sent,
                        currency = %currency_in,
                        "transferred taint"
                    );
                }
            }
        }
    }

    fn apply_fee_to_ledger(
        &self,
        ledger: &mut TempLedger,
        sender: Address,
        miner: Address,
        total_fee: U256,
        miner_fee: U256,
    ) {
        if !self.kind.uses_ledger() {
            return;
        }
        ledger.decrease(sender, Currency::Eth, total_fee);
        ledger.increase(miner, Currency::Eth, miner_fee);
    }

    fn log_fee(&self, sender: Address, miner: Address, tainted_fee: U256, to_miner: U256) {
        if tainted_fee.is_zero() && to_miner.is_zero() {
            return;
        }
        debug!(
            sender = %sender,
            miner = %miner,
            removed = %tainted_fee,
            to_miner = %to_miner,
            "fee taint processed"
        );
    }
}
