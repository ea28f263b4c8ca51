//! Chain access seam.
//!
//! `ChainSource` is the complete set of operations the engine consumes from a
//! node; `RpcChainSource` implements it over HTTP JSON-RPC with bounded
//! caches for token reads. The rest of the engine only ever sees the plain
//! record types defined here.

pub mod events;
pub mod traces;

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use alloy_consensus::TxReceipt;
use alloy_primitives::{Address, Bytes, Log, TxKind, B256, U256};
use alloy_provider::ext::TraceApi;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::trace::parity::{Action, CallType};
use alloy_rpc_types::{BlockId, BlockNumberOrTag, TransactionInput, TransactionRequest, TransactionTrait};
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, WrapErr};
use lru::LruCache;
use tracing::debug;

use crate::types::Currency;
pub use traces::RawTrace;

sol! {
    function balanceOf(address account) external view returns (uint256);
    function name() external view returns (string);
    function symbol() external view returns (string);
}

const BALANCE_CACHE_SIZE: usize = 1024;
const METADATA_CACHE_SIZE: usize = 64;

/// A block with the transaction fields the engine reads.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub number: u64,
    pub miner: Address,
    pub base_fee: u128,
    pub transactions: Vec<TxData>,
}

#[derive(Debug, Clone)]
pub struct TxData {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

/// A transaction receipt reduced to status, gas accounting and raw logs.
#[derive(Debug, Clone)]
pub struct ReceiptData {
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<ReceiptLog>,
}

#[derive(Debug, Clone)]
pub struct ReceiptLog {
    pub log_index: u64,
    pub inner: Log,
}

/// Outcome of a `balanceOf` read. The two failure kinds are kept apart so
/// callers can log the cause before treating the balance as zero: `NoOutput`
/// means the target is not an ERC20-like contract at all, `Reverted` means
/// the contract rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBalance {
    Value(U256),
    NoOutput,
    Reverted,
}

/// The operations the engine consumes from a node. Implemented over JSON-RPC
/// in production and by scripted mocks in tests.
#[allow(async_fn_in_trait)]
pub trait ChainSource {
    async fn block(&self, number: u64) -> eyre::Result<BlockData>;
    async fn receipts(&self, number: u64) -> eyre::Result<Vec<ReceiptData>>;
    async fn traces(&self, number: u64) -> eyre::Result<Vec<RawTrace>>;
    async fn eth_balance(&self, account: Address, block: u64) -> eyre::Result<U256>;
    async fn token_balance(
        &self,
        token: Address,
        account: Address,
        block: u64,
    ) -> eyre::Result<TokenBalance>;
    async fn token_name(&self, token: Address) -> Option<String>;
    async fn token_symbol(&self, token: Address) -> Option<String>;
    async fn latest_block(&self) -> eyre::Result<u64>;
    /// Whether the node still holds world state for `block`.
    async fn state_available(&self, block: u64) -> eyre::Result<bool>;

    /// Balance in `currency`, with unsupported-token reads recovered as zero.
    async fn balance(&self, account: Address, currency: Currency, block: u64) -> eyre::Result<U256> {
        match currency {
            Currency::Eth => self.eth_balance(account, block).await,
            Currency::Token(token) => {
                match self.token_balance(token, account, block).await? {
                    TokenBalance::Value(value) => Ok(value),
                    TokenBalance::NoOutput => {
                        debug!(%token, %account, "balanceOf returned no output, treating balance as zero");
                        Ok(U256::ZERO)
                    }
                    TokenBalance::Reverted => {
                        debug!(%token, %account, "balanceOf reverted, treating balance as zero");
                        Ok(U256::ZERO)
                    }
                }
            }
        }
    }
}

/// JSON-RPC implementation of [`ChainSource`].
pub struct RpcChainSource<P> {
    provider: P,
    balance_cache: Mutex<LruCache<(Address, Address, u64), TokenBalance>>,
    name_cache: Mutex<LruCache<Address, Option<String>>>,
    symbol_cache: Mutex<LruCache<Address, Option<String>>>,
}

/// Connect to a node over HTTP.
pub async fn connect_http(url: &str) -> eyre::Result<RpcChainSource<impl Provider>> {
    let provider = ProviderBuilder::new()
        .connect(url)
        .await
        .wrap_err_with(|| format!("connecting to node at {url}"))?;
    Ok(RpcChainSource::new(provider))
}

impl<P: Provider> RpcChainSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            balance_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BALANCE_CACHE_SIZE).expect("nonzero cache size"),
            )),
            name_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(METADATA_CACHE_SIZE).expect("nonzero cache size"),
            )),
            symbol_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(METADATA_CACHE_SIZE).expect("nonzero cache size"),
            )),
        }
    }

    async fn call_token(&self, token: Address, data: Vec<u8>, block: Option<u64>) -> Result<Bytes, String> {
        let request = TransactionRequest {
            to: Some(TxKind::Call(token)),
            input: TransactionInput::new(data.into()),
            ..Default::default()
        };
        let call = self.provider.call(request);
        let call = match block {
            Some(number) => call.block(BlockId::number(number)),
            None => call,
        };
        call.await.map_err(|e| e.to_string())
    }
}

impl<P: Provider> ChainSource for RpcChainSource<P> {
    async fn block(&self, number: u64) -> eyre::Result<BlockData> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .full()
            .await
            .wrap_err_with(|| format!("fetching block {number}"))?
            .ok_or_else(|| eyre!("block {number} not found"))?;

        let transactions = block
            .transactions
            .as_transactions()
            .ok_or_else(|| eyre!("block {number} was returned without full transactions"))?
            .iter()
            .map(|tx| TxData {
                hash: *tx.inner.tx_hash(),
                from: tx.inner.signer(),
                to: tx.to(),
                value: tx.value(),
            })
            .collect();

        Ok(BlockData {
            number,
            miner: block.header.beneficiary,
            base_fee: block.header.base_fee_per_gas.unwrap_or_default() as u128,
            transactions,
        })
    }

    async fn receipts(&self, number: u64) -> eyre::Result<Vec<ReceiptData>> {
        let receipts = self
            .provider
            .get_block_receipts(BlockId::number(number))
            .await
            .wrap_err_with(|| format!("fetching receipts for block {number}"))?
            .ok_or_else(|| eyre!("receipts for block {number} not found"))?;

        Ok(receipts
            .into_iter()
            .map(|receipt| ReceiptData {
                status: receipt.status(),
                gas_used: receipt.gas_used,
                effective_gas_price: receipt.effective_gas_price,
                logs: receipt
                    .inner
                    .logs()
                    .iter()
                    .enumerate()
                    .map(|(position, log)| ReceiptLog {
                        log_index: log.log_index.unwrap_or(position as u64),
                        inner: log.inner.clone(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn traces(&self, number: u64) -> eyre::Result<Vec<RawTrace>> {
        let traces = self
            .provider
            .trace_block(BlockId::number(number))
            .await
            .wrap_err_with(|| format!("fetching traces for block {number}"))?;

        Ok(traces
            .into_iter()
            .map(|localized| {
                let (from, to, value, is_call) = match &localized.trace.action {
                    Action::Call(call) => (
                        call.from,
                        call.to,
                        call.value,
                        call.call_type == CallType::Call,
                    ),
                    // Creates, selfdestructs and rewards never classify as
                    // internal sends, but their errors still mask subtrees.
                    _ => (Address::ZERO, Address::ZERO, U256::ZERO, false),
                };
                RawTrace {
                    tx_index: localized.transaction_position,
                    trace_address: localized.trace.trace_address.clone(),
                    from,
                    to,
                    value,
                    is_call,
                    error: localized.trace.error.clone(),
                }
            })
            .collect())
    }

    async fn eth_balance(&self, account: Address, block: u64) -> eyre::Result<U256> {
        self.provider
            .get_balance(account)
            .block_id(BlockId::number(block))
            .await
            .wrap_err_with(|| format!("fetching balance of {account} at block {block}"))
    }

    async fn token_balance(
        &self,
        token: Address,
        account: Address,
        block: u64,
    ) -> eyre::Result<TokenBalance> {
        let key = (token, account, block);
        if let Some(cached) = lock(&self.balance_cache).get(&key) {
            return Ok(*cached);
        }

        let calldata = balanceOfCall { account }.abi_encode();
        let result = match self.call_token(token, calldata, Some(block)).await {
            Ok(output) if output.is_empty() => TokenBalance::NoOutput,
            Ok(output) => match balanceOfCall::abi_decode_returns(&output) {
                Ok(value) => TokenBalance::Value(value),
                Err(_) => TokenBalance::NoOutput,
            },
            Err(message) if is_revert(&message) => TokenBalance::Reverted,
            Err(message) => {
                return Err(eyre!(
                    "balanceOf({account}) on {token} at block {block} failed: {message}"
                ))
            }
        };

        lock(&self.balance_cache).put(key, result);
        Ok(result)
    }

    async fn token_name(&self, token: Address) -> Option<String> {
        if let Some(cached) = lock(&self.name_cache).get(&token) {
            return cached.clone();
        }
        let result = match self.call_token(token, nameCall {}.abi_encode(), None).await {
            Ok(output) => nameCall::abi_decode_returns(&output).ok(),
            Err(message) => {
                debug!(%token, %message, "token name() call failed");
                None
            }
        };
        lock(&self.name_cache).put(token, result.clone());
        result
    }

    async fn token_symbol(&self, token: Address) -> Option<String> {
        if let Some(cached) = lock(&self.symbol_cache).get(&token) {
            return cached.clone();
        }
        let result = match self.call_token(token, symbolCall {}.abi_encode(), None).await {
            Ok(output) => symbolCall::abi_decode_returns(&output).ok(),
            Err(message) => {
                debug!(%token, %message, "token symbol() call failed");
                None
            }
        };
        lock(&self.symbol_cache).put(token, result.clone());
        result
    }

    async fn latest_block(&self) -> eyre::Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("fetching latest block number")
    }

    async fn state_available(&self, block: u64) -> eyre::Result<bool> {
        match self
            .provider
            .get_balance(Address::ZERO)
            .block_id(BlockId::number(block))
            .await
        {
            Ok(_) => Ok(true),
            Err(error) => {
                let message = error.to_string();
                if is_pruned_state(&message) {
                    Ok(false)
                } else {
                    Err(eyre!("probing state at block {block} failed: {message}"))
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_revert(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("revert") || lower.contains("execution error")
}

/// Error shapes archive and full nodes return when the requested state has
/// been pruned away.
fn is_pruned_state(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("missing trie node")
        || lower.contains("state not available")
        || lower.contains("pruned")
        || lower.contains("distance to target block exceeds")
}
