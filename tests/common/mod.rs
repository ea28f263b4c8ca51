// Shared test harness: a scripted chain source plus builders for blocks,
// receipts and traces.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use alloy_primitives::{address, Address, Log, B256, U256};
use alloy_sol_types::SolEvent;

use taint_tracker::chain::events::{Deposit, Transfer, Withdrawal};
use taint_tracker::chain::traces::RawTrace;
use taint_tracker::chain::{BlockData, ChainSource, ReceiptData, ReceiptLog, TokenBalance, TxData};

pub const AAA: Address = address!("00000000000000000000000000000000000000aa");
pub const BBB: Address = address!("00000000000000000000000000000000000000bb");
pub const CCC: Address = address!("00000000000000000000000000000000000000cc");
pub const MINER: Address = address!("00000000000000000000000000000000000000ee");
pub const TOKEN: Address = address!("00000000000000000000000000000000000000dd");

/// Scripted chain: blocks/receipts/traces by number, balances by account.
/// Unscripted blocks come back empty so jobs can span quiet ranges.
#[derive(Debug, Default)]
pub struct MockChain {
    pub blocks: BTreeMap<u64, BlockData>,
    pub receipts: BTreeMap<u64, Vec<ReceiptData>>,
    pub traces: BTreeMap<u64, Vec<RawTrace>>,
    pub eth_balances: HashMap<Address, U256>,
    pub token_balances: HashMap<(Address, Address), U256>,
}

impl MockChain {
    pub fn set_eth_balance(&mut self, account: Address, balance: u64) {
        self.eth_balances.insert(account, U256::from(balance));
    }

    pub fn set_token_balance(&mut self, token: Address, account: Address, balance: u64) {
        self.token_balances
            .insert((token, account), U256::from(balance));
    }

    pub fn add_block(
        &mut self,
        number: u64,
        transactions: Vec<TxData>,
        receipts: Vec<ReceiptData>,
        traces: Vec<RawTrace>,
    ) {
        self.blocks.insert(
            number,
            BlockData {
                number,
                miner: MINER,
                base_fee: 0,
                transactions,
            },
        );
        self.receipts.insert(number, receipts);
        self.traces.insert(number, traces);
    }
}

impl ChainSource for MockChain {
    async fn block(&self, number: u64) -> eyre::Result<BlockData> {
        Ok(self.blocks.get(&number).cloned().unwrap_or(BlockData {
            number,
            miner: MINER,
            base_fee: 0,
            transactions: Vec::new(),
        }))
    }

    async fn receipts(&self, number: u64) -> eyre::Result<Vec<ReceiptData>> {
        Ok(self.receipts.get(&number).cloned().unwrap_or_default())
    }

    async fn traces(&self, number: u64) -> eyre::Result<Vec<RawTrace>> {
        Ok(self.traces.get(&number).cloned().unwrap_or_default())
    }

    async fn eth_balance(&self, account: Address, _block: u64) -> eyre::Result<U256> {
        Ok(self.eth_balances.get(&account).copied().unwrap_or_default())
    }

    async fn token_balance(
        &self,
        token: Address,
        account: Address,
        _block: u64,
    ) -> eyre::Result<TokenBalance> {
        Ok(self
            .token_balances
            .get(&(token, account))
            .copied()
            .map(TokenBalance::Value)
            .unwrap_or(TokenBalance::NoOutput))
    }

    async fn token_name(&self, _token: Address) -> Option<String> {
        None
    }

    async fn token_symbol(&self, _token: Address) -> Option<String> {
        None
    }

    async fn latest_block(&self) -> eyre::Result<u64> {
        Ok(self.blocks.keys().next_back().copied().unwrap_or_default())
    }

    async fn state_available(&self, _block: u64) -> eyre::Result<bool> {
        Ok(true)
    }
}

pub fn tx(tag: u8, from: Address, to: Option<Address>, value: u64) -> TxData {
    TxData {
        hash: B256::repeat_byte(tag),
        from,
        to,
        value: U256::from(value),
    }
}

/// Successful receipt with a zero fee so balances move only through value
/// transfers unless a test asks otherwise.
pub fn receipt_ok(logs: Vec<ReceiptLog>) -> ReceiptData {
    ReceiptData {
        status: true,
        gas_used: 21_000,
        effective_gas_price: 0,
        logs,
    }
}

pub fn receipt_with_fee(gas_used: u64, effective_gas_price: u128, logs: Vec<ReceiptLog>) -> ReceiptData {
    ReceiptData {
        status: true,
        gas_used,
        effective_gas_price,
        logs,
    }
}

pub fn transfer_log(index: u64, token: Address, from: Address, to: Address, value: u64) -> ReceiptLog {
    let data = Transfer {
        from,
        to,
        value: U256::from(value),
    }
    .encode_log_data();
    ReceiptLog {
        log_index: index,
        inner: Log::new(token, data.topics().to_vec(), data.data.clone()).unwrap(),
    }
}

pub fn deposit_log(index: u64, dst: Address, wad: u64) -> ReceiptLog {
    let data = Deposit {
        dst,
        wad: U256::from(wad),
    }
    .encode_log_data();
    ReceiptLog {
        log_index: index,
        inner: Log::new(taint_tracker::WETH, data.topics().to_vec(), data.data.clone()).unwrap(),
    }
}

pub fn withdrawal_log(index: u64, src: Address, wad: u64) -> ReceiptLog {
    let data = Withdrawal {
        src,
        wad: U256::from(wad),
    }
    .encode_log_data();
    ReceiptLog {
        log_index: index,
        inner: Log::new(taint_tracker::WETH, data.topics().to_vec(), data.data.clone()).unwrap(),
    }
}

pub fn call_trace(tx_index: u64, from: Address, to: Address, value: u64) -> RawTrace {
    RawTrace {
        tx_index: Some(tx_index),
        trace_address: Vec::new(),
        from,
        to,
        value: U256::from(value),
        is_call: true,
        error: None,
    }
}

/// Unique scratch directory under the system temp dir.
pub fn temp_data_dir(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "taint_tracker_{name}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&path).unwrap();
    path
}
