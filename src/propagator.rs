//! The top-level propagation loop.
//!
//! Drives one block at a time: fetch block/receipts/traces, sequence each
//! transaction's events, fold them through the policy, and at interval
//! boundaries emit a metrics row, save a checkpoint and log the largest
//! tainted accounts. Interruption is cooperative between blocks; a partially
//! processed block is never checkpointed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::{Address, U256};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chain::traces::internal_transfers;
use crate::chain::ChainSource;
use crate::ledger::TempLedger;
use crate::metrics::{write_json_atomic, write_taint_records, MetricsCsv, TaintRecord};
use crate::policy::TaintPolicy;
use crate::sequencer::sequence_events;
use crate::types::{Currency, TxEvent, NULL_ADDRESS, WETH};

/// Accounts with fewer recorded taint movements are left out of the tally.
const MIN_REPORTED_MOVEMENTS: u64 = 1;

fn progress_interval(block_count: u64) -> u64 {
    match block_count {
        0..=20 => 1,
        21..=200 => 10,
        201..=2_000 => 100,
        _ => 500,
    }
}

/// One propagation job as configured for a dataset.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub start_block: u64,
    pub block_count: u64,
    pub seed_accounts: Vec<Address>,
    pub permanent_taint: bool,
}

/// Saved propagation state: the last fully processed block plus snapshots of
/// the blacklist and the tainted-transaction tally.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block: u64,
    pub blacklist: Value,
    #[serde(rename = "tainted transactions")]
    pub tainted_transactions: BTreeMap<Address, TaintRecord>,
}

impl Checkpoint {
    pub fn load(path: &Path) -> eyre::Result<Option<Checkpoint>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("reading checkpoint {}", path.display()))
            }
        };
        let checkpoint = serde_json::from_str(&content)
            .wrap_err_with(|| format!("parsing checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn save(&self, path: &Path) -> eyre::Result<()> {
        write_json_atomic(path, &serde_json::to_value(self)?)
    }
}

pub struct Propagator<C> {
    chain: C,
    policy: TaintPolicy,
    job: Job,
    data_dir: PathBuf,
    records: BTreeMap<Address, TaintRecord>,
    interrupted: Arc<AtomicBool>,
    last_processed: Option<u64>,
}

impl<C: ChainSource> Propagator<C> {
    pub fn new(chain: C, policy: TaintPolicy, job: Job, data_dir: PathBuf) -> Self {
        Self {
            chain,
            policy,
            job,
            data_dir,
            records: BTreeMap::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            last_processed: None,
        }
    }

    /// Flag checked between blocks; set it to request a clean shutdown.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn policy(&self) -> &TaintPolicy {
        &self.policy
    }

    pub fn records(&self) -> &BTreeMap<Address, TaintRecord> {
        &self.records
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_checkpoint.json", self.file_stem()))
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_blacklist.json", self.file_stem()))
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_metrics.csv", self.file_stem()))
    }

    pub fn tally_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}_tainted_transactions.csv", self.file_stem()))
    }

    fn file_stem(&self) -> String {
        format!("{}_{}", self.job.name, self.policy.kind().name())
    }

    /// Run the job. With `load_checkpoint`, a saved state strictly inside the
    /// job's block window is resumed; a checkpoint already at the target
    /// returns immediately; anything else starts fresh.
    pub async fn propagate(&mut self, load_checkpoint: bool) -> eyre::Result<()> {
        eyre::ensure!(self.job.block_count > 0, "block count must be positive");
        let start = self.job.start_block;
        let target = start + self.job.block_count - 1;
        let mut loop_start = start;
        let mut resumed = false;

        if load_checkpoint {
            match Checkpoint::load(&self.checkpoint_path())? {
                Some(checkpoint) if checkpoint.block == target => {
                    info!(block = checkpoint.block, "checkpoint already at target block");
                    return Ok(());
                }
                Some(checkpoint) if checkpoint.block > start && checkpoint.block < target => {
                    self.policy.store_mut().load_json(&checkpoint.blacklist)?;
                    self.records = checkpoint.tainted_transactions;
                    loop_start = checkpoint.block + 1;
                    self.last_processed = Some(checkpoint.block);
                    resumed = true;
                    info!(block = checkpoint.block, "resuming from checkpoint");
                }
                Some(checkpoint) => {
                    info!(
                        block = checkpoint.block,
                        start, target, "checkpoint outside the job window, starting fresh"
                    );
                }
                None => {}
            }
        }

        if !resumed {
            for account in self.job.seed_accounts.clone() {
                self.policy
                    .seed_account(&self.chain, account, start)
                    .await?;
            }
        }
        // Permanence is configuration, not state; arm it on every start.
        if self.job.permanent_taint {
            for &account in &self.job.seed_accounts {
                self.policy.permanently_taint(account);
            }
        }

        let metrics = if resumed {
            MetricsCsv::resume(self.metrics_path())?
        } else {
            MetricsCsv::create(self.metrics_path())?
        };

        let interval = progress_interval(self.job.block_count);
        let started = Instant::now();
        let total_blocks = target - loop_start + 1;
        let mut processed: u64 = 0;

        info!(
            policy = self.policy.kind().name(),
            dataset = %self.job.name,
            start = loop_start,
            target,
            interval,
            "starting propagation"
        );

        for number in loop_start..=target {
            if self.interrupted.load(Ordering::Relaxed) {
                info!(next_block = number, "interrupted, shutting down cleanly");
                break;
            }
            self.process_block(number)
                .await
                .wrap_err_with(|| format!("processing block {number}"))?;
            processed += 1;

            if processed % interval == 0 && number != target {
                self.tick(&metrics, number, processed, total_blocks, &started)
                    .await?;
            }
        }

        self.finish(&metrics).await
    }

    async fn process_block(&mut self, number: u64) -> eyre::Result<()> {
        let block = self.chain.block(number).await?;
        let receipts = self.chain.receipts(number).await?;
        eyre::ensure!(
            block.transactions.len() == receipts.len(),
            "block {number} has {} transactions but {} receipts",
            block.transactions.len(),
            receipts.len()
        );
        let traces = self.chain.traces(number).await?;
        let internals = internal_transfers(&traces, block.transactions.len());

        let mut ledger = TempLedger::new();
        for (index, (tx, receipt)) in block.transactions.iter().zip(receipts.iter()).enumerate() {
            let events =
                sequence_events(tx, receipt, &internals[index], block.miner, block.base_fee)
                    .wrap_err_with(|| format!("sequencing transaction {}", tx.hash))?;
            for event in events {
                self.apply_event(&mut ledger, number, event)
                    .await
                    .wrap_err_with(|| format!("transaction {}", tx.hash))?;
            }
        }

        self.last_processed = Some(number);
        Ok(())
    }

    async fn apply_event(
        &mut self,
        ledger: &mut TempLedger,
        block: u64,
        event: TxEvent,
    ) -> eyre::Result<()> {
        match event {
            TxEvent::Transfer {
                token,
                from,
                to,
                value,
            } => {
                let currency = Currency::Token(token);
                // First contact with a token by a seed account taints its
                // whole balance before the transfer itself is judged.
                for account in [from, to] {
                    if account != NULL_ADDRESS && self.policy.store().has_full_taint_flag(account)
                    {
                        self.policy
                            .fully_taint_token(&self.chain, account, token, block)
                            .await?;
                    }
                }
                let moved = self
                    .policy
                    .transfer_taint(
                        &self.chain,
                        ledger,
                        block,
                        from,
                        Some(to),
                        value,
                        currency,
                        currency,
                    )
                    .await?;
                self.adjust_ledger(ledger, from, to, currency, value);
                if !moved.is_zero() {
                    self.record_transfer(from, to);
                }
            }

            TxEvent::EthTransfer { from, to, value } => {
                let moved = self
                    .policy
                    .transfer_taint(
                        &self.chain,
                        ledger,
                        block,
                        from,
                        Some(to),
                        value,
                        Currency::Eth,
                        Currency::Eth,
                    )
                    .await?;
                self.adjust_ledger(ledger, from, to, Currency::Eth, value);
                if !moved.is_zero() {
                    self.record_transfer(from, to);
                }
            }

            TxEvent::Deposit { token, dst, wad } => {
                if token != WETH {
                    debug!(token = %token, "deposit log from a non-wrapped-native contract, skipping");
                    return Ok(());
                }
                self.policy
                    .transfer_taint(
                        &self.chain,
                        ledger,
                        block,
                        dst,
                        Some(dst),
                        wad,
                        Currency::Eth,
                        Currency::WRAPPED_NATIVE,
                    )
                    .await?;
                if self.policy.kind().uses_ledger() {
                    ledger.decrease(dst, Currency::Eth, wad);
                    ledger.increase(dst, Currency::WRAPPED_NATIVE, wad);
                }
            }

            TxEvent::Withdrawal { token, src, wad } => {
                if token != WETH {
                    debug!(token = %token, "withdrawal log from a non-wrapped-native contract, skipping");
                    return Ok(());
                }
                self.policy
                    .transfer_taint(
                        &self.chain,
                        ledger,
                        block,
                        src,
                        Some(src),
                        wad,
                        Currency::WRAPPED_NATIVE,
                        Currency::Eth,
                    )
                    .await?;
                if self.policy.kind().uses_ledger() {
                    ledger.decrease(src, Currency::WRAPPED_NATIVE, wad);
                    ledger.increase(src, Currency::Eth, wad);
                }
            }

            TxEvent::GasFee {
                sender,
                miner,
                total,
                to_miner,
            } => {
                let (removed, credited) = self
                    .policy
                    .process_gas_fee(&self.chain, ledger, block, sender, miner, total, to_miner)
                    .await?;
                if !removed.is_zero() || !credited.is_zero() {
                    self.record_fee(sender, miner);
                }
            }
        }
        Ok(())
    }

    fn adjust_ledger(
        &self,
        ledger: &mut TempLedger,
        from: Address,
        to: Address,
        currency: Currency,
        value: U256,
    ) {
        if !self.policy.kind().uses_ledger() {
            return;
        }
        if from != NULL_ADDRESS {
            ledger.decrease(from, currency, value);
        }
        if to != NULL_ADDRESS {
            ledger.increase(to, currency, value);
        }
    }

    fn record_transfer(&mut self, from: Address, to: Address) {
        if from != NULL_ADDRESS {
            self.records.entry(from).or_default().outgoing += 1;
        }
        if to != NULL_ADDRESS {
            self.records.entry(to).or_default().incoming += 1;
        }
    }

    fn record_fee(&mut self, sender: Address, miner: Address) {
        self.records.entry(sender).or_default().outgoing_fee += 1;
        self.records.entry(miner).or_default().incoming_fee += 1;
    }

    async fn tick(
        &self,
        metrics: &MetricsCsv,
        block: u64,
        processed: u64,
        total_blocks: u64,
        started: &Instant,
    ) -> eyre::Result<()> {
        self.emit_metrics(metrics, block).await?;
        self.save_checkpoint(block)?;

        let top = self
            .policy
            .store()
            .top_accounts(5, &[Currency::Eth, Currency::WRAPPED_NATIVE]);
        for (rank, (account, amount)) in top.iter().enumerate() {
            info!(rank = rank + 1, account = %account, amount = %amount, "top tainted account");
        }

        let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
        let rate = processed as f64 / elapsed;
        let remaining_secs = (total_blocks - processed) as f64 / rate;
        info!(
            block,
            progress = format!("{:.2}%", processed as f64 / total_blocks as f64 * 100.0),
            rate = format!("{rate:.1} blocks/s"),
            remaining = format!("{remaining_secs:.0}s"),
            "propagation progress"
        );
        Ok(())
    }

    async fn emit_metrics(&self, metrics: &MetricsCsv, block: u64) -> eyre::Result<()> {
        let store_metrics = self.policy.store().metrics();
        let amounts = self.policy.blacklisted_amounts(&self.chain, block + 1).await?;
        let total_eth = amounts.get(&Currency::Eth).copied().unwrap_or_default();
        // Each movement is counted once, at its source.
        let tainted: u64 = self
            .records
            .values()
            .map(|r| r.outgoing + r.outgoing_fee)
            .sum();
        metrics.append(block, store_metrics.unique_accounts, total_eth, tainted)
    }

    fn save_checkpoint(&self, block: u64) -> eyre::Result<()> {
        let checkpoint = Checkpoint {
            block,
            blacklist: self.policy.store().to_json(),
            tainted_transactions: self.records.clone(),
        };
        checkpoint.save(&self.checkpoint_path())
    }

    async fn finish(&self, metrics: &MetricsCsv) -> eyre::Result<()> {
        let Some(last) = self.last_processed else {
            info!("no blocks processed, nothing to finalize");
            return Ok(());
        };

        self.sanity_check(last).await;
        self.emit_metrics(metrics, last).await?;
        self.save_checkpoint(last)?;
        write_json_atomic(&self.blacklist_path(), &self.policy.store().to_json())?;
        write_taint_records(&self.tally_path(), &self.records, MIN_REPORTED_MOVEMENTS)?;

        let store_metrics = self.policy.store().metrics();
        info!(
            block = last,
            accounts = store_metrics.unique_accounts,
            currencies = store_metrics.unique_currencies,
            "propagation finished"
        );
        Ok(())
    }

    /// Compare every tainted value with the live balance one block past the
    /// tip. Violations only warn: a transfer outside the observed window can
    /// legitimately drain an account before the policy sees it.
    async fn sanity_check(&self, last: u64) {
        if self.policy.store().is_blacklisted(NULL_ADDRESS, None) {
            warn!("null address is blacklisted");
        }
        for (account, currency, value) in self.policy.store().entries() {
            match self.chain.balance(account, currency, last + 1).await {
                Ok(balance) if value > balance => warn!(
                    account = %account,
                    currency = %currency,
                    taint = %value,
                    balance = %balance,
                    excess = %(value - balance),
                    "tainted value exceeds live balance"
                ),
                Ok(_) => {}
                Err(error) => warn!(
                    account = %account,
                    currency = %currency,
                    error = %error,
                    "balance read failed during sanity check"
                ),
            }
        }
    }
}
