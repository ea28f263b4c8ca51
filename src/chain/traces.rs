//! Trace-stream filtering: raw call traces → internal native transfers.
//!
//! Only `call` entries with nonzero value move ETH. An entry carrying an
//! error reverted, and so did everything underneath it; its trace address is
//! recorded and used as a prefix filter for the rest of the transaction.

use alloy_primitives::{Address, U256};
use tracing::warn;

use crate::types::InternalTransfer;

/// A flattened call-tree entry as delivered by the chain source.
#[derive(Debug, Clone)]
pub struct RawTrace {
    /// Transaction index within the block; None for non-transaction entries
    /// such as block rewards.
    pub tx_index: Option<u64>,
    pub trace_address: Vec<usize>,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    /// True only for plain `call` entries (not delegatecall/staticcall/create).
    pub is_call: bool,
    pub error: Option<String>,
}

/// Group a block's traces per transaction, keeping only the entries that
/// actually moved value.
pub fn internal_transfers(traces: &[RawTrace], tx_count: usize) -> Vec<Vec<InternalTransfer>> {
    let mut per_tx: Vec<Vec<InternalTransfer>> = vec![Vec::new(); tx_count];
    let mut reverted: Vec<Vec<usize>> = Vec::new();
    let mut current_tx: Option<u64> = None;

    for trace in traces {
        let Some(tx_index) = trace.tx_index else {
            continue;
        };
        if current_tx != Some(tx_index) {
            current_tx = Some(tx_index);
            reverted.clear();
        }

        if in_reverted_subtree(&reverted, &trace.trace_address) {
            continue;
        }
        if trace.error.is_some() {
            reverted.push(trace.trace_address.clone());
            continue;
        }
        if !trace.is_call || trace.value.is_zero() {
            continue;
        }

        match per_tx.get_mut(tx_index as usize) {
            Some(events) => events.push(InternalTransfer {
                from: trace.from,
                to: trace.to,
                value: trace.value,
            }),
            None => warn!(
                tx_index,
                tx_count, "trace references a transaction index outside the block"
            ),
        }
    }

    per_tx
}

fn in_reverted_subtree(reverted: &[Vec<usize>], trace_address: &[usize]) -> bool {
    reverted.iter().any(|prefix| {
        trace_address.len() >= prefix.len() && trace_address[..prefix.len()] == prefix[..]
    })
}
