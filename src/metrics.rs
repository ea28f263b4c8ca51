//! File outputs: the per-interval metrics CSV, blacklist JSON snapshots and
//! the tainted-transaction tally CSV.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, U256};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-account count of taint-moving transfers, kept for reporting only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintRecord {
    pub incoming: u64,
    pub outgoing: u64,
    pub incoming_fee: u64,
    pub outgoing_fee: u64,
}

impl TaintRecord {
    pub fn total(&self) -> u64 {
        self.incoming + self.outgoing + self.incoming_fee + self.outgoing_fee
    }
}

/// Append-only metrics series; one row per progress tick.
#[derive(Debug)]
pub struct MetricsCsv {
    path: PathBuf,
}

impl MetricsCsv {
    /// Start a fresh series, truncating any previous file.
    pub fn create(path: PathBuf) -> eyre::Result<Self> {
        let file = File::create(&path)
            .wrap_err_with(|| format!("creating metrics file {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["Block", "Unique accounts", "Total ETH", "Tainted transactions"])?;
        writer.flush()?;
        Ok(Self { path })
    }

    /// Continue an interrupted series. Creates the file when missing.
    pub fn resume(path: PathBuf) -> eyre::Result<Self> {
        if path.exists() {
            Ok(Self { path })
        } else {
            Self::create(path)
        }
    }

    pub fn append(
        &self,
        block: u64,
        unique_accounts: usize,
        total_eth: U256,
        tainted_transactions: u64,
    ) -> eyre::Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .wrap_err_with(|| format!("opening metrics file {}", self.path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record([
            block.to_string(),
            unique_accounts.to_string(),
            total_eth.to_string(),
            tainted_transactions.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

/// Write the tainted-transaction tally, most active accounts first. Accounts
/// below `min_count` movements are left out.
pub fn write_taint_records(
    path: &Path,
    records: &BTreeMap<Address, TaintRecord>,
    min_count: u64,
) -> eyre::Result<()> {
    let file = File::create(path)
        .wrap_err_with(|| format!("creating tainted-transaction file {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["Account", "Incoming", "Outgoing"])?;

    let mut ranked: Vec<(&Address, &TaintRecord)> = records
        .iter()
        .filter(|(_, record)| record.total() >= min_count)
        .collect();
    ranked.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then(a.0.cmp(b.0)));

    for (account, record) in ranked {
        writer.write_record([
            account.to_checksum(None),
            (record.incoming + record.incoming_fee).to_string(),
            (record.outgoing + record.outgoing_fee).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize `value` and replace `path` in one step: write a `.tmp` sibling,
/// then rename it over the target.
pub fn write_json_atomic(path: &Path, value: &Value) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("creating directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, &json)
        .wrap_err_with(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .wrap_err_with(|| format!("renaming over {}", path.display()))?;
    Ok(())
}
