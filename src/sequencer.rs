//! Per-transaction event ordering.
//!
//! The receipt-log stream and the trace stream are independently ordered and
//! only partially overlap: token transfers appear only in logs, plain ETH
//! internals only in traces, and wrapped-native conversions in both. This
//! module merges the two into one canonical sequence per transaction,
//! collapsing each WETH Deposit/Withdrawal log with its trace counterpart and
//! closing with the gas-fee event.

use std::collections::VecDeque;

use alloy_primitives::{Address, U256};
use eyre::{bail, eyre};

use crate::chain::events::{decode_log, LogEvent, LogEventKind};
use crate::chain::{ReceiptData, TxData};
use crate::types::{InternalKind, InternalTransfer, TxEvent, WETH};

/// Build the ordered event stream for one transaction.
pub fn sequence_events(
    tx: &TxData,
    receipt: &ReceiptData,
    internals: &[InternalTransfer],
    miner: Address,
    base_fee: u128,
) -> eyre::Result<Vec<TxEvent>> {
    let gas_fee = gas_fee_event(tx, receipt, miner, base_fee);

    // A failed transaction moves no value; only its fee is charged.
    if !receipt.status {
        return Ok(vec![gas_fee]);
    }

    let mut internals: VecDeque<InternalTransfer> = internals.iter().cloned().collect();

    if receipt.logs.is_empty() && internals.len() < 2 {
        let mut events = Vec::with_capacity(2);
        if let Some(internal) = internals.pop_front() {
            events.push(eth_transfer(internal));
        }
        events.push(gas_fee);
        return Ok(events);
    }

    let mut log_events: Vec<LogEvent> = receipt
        .logs
        .iter()
        .filter_map(|log| decode_log(&log.inner, log.log_index))
        .collect();
    log_events.sort_by_key(|event| event.log_index);

    let mut events = Vec::with_capacity(log_events.len() + internals.len() + 1);

    // The outer call's ETH value shows up only in the trace stream; its entry
    // leads the traces unless the receiver is the wrapped-native contract, in
    // which case the Deposit log covers it.
    if !tx.value.is_zero() && tx.to != Some(WETH) {
        let outer = internals.pop_front().ok_or_else(|| {
            eyre!(
                "transaction {} carries value but its trace stream has no outer send",
                tx.hash
            )
        })?;
        events.push(eth_transfer(outer));
    }

    for log_event in log_events {
        match log_event.kind {
            LogEventKind::Deposit { token, dst, wad } if token == WETH && !wad.is_zero() => {
                drain_until(
                    &mut internals,
                    &mut events,
                    InternalKind::Deposit,
                    log_event.log_index,
                    tx,
                )?;
                events.push(TxEvent::Deposit { token, dst, wad });
            }
            LogEventKind::Withdrawal { token, src, wad } if token == WETH && !wad.is_zero() => {
                drain_until(
                    &mut internals,
                    &mut events,
                    InternalKind::Withdrawal,
                    log_event.log_index,
                    tx,
                )?;
                events.push(TxEvent::Withdrawal { token, src, wad });
            }
            LogEventKind::Transfer {
                token,
                from,
                to,
                value,
            } => events.push(TxEvent::Transfer {
                token,
                from,
                to,
                value,
            }),
            LogEventKind::Deposit { token, dst, wad } => {
                events.push(TxEvent::Deposit { token, dst, wad })
            }
            LogEventKind::Withdrawal { token, src, wad } => {
                events.push(TxEvent::Withdrawal { token, src, wad })
            }
        }
    }

    // Leftover internals are plain ETH sends. A wrapped-native conversion
    // surviving to this point has no matching log, which means the two
    // streams disagree.
    for internal in internals {
        if internal.kind() != InternalKind::Plain {
            bail!(
                "unmatched wrapped-native conversion left in trace stream of {}",
                tx.hash
            );
        }
        events.push(eth_transfer(internal));
    }

    events.push(gas_fee);
    Ok(events)
}

/// Emit internal entries until the front of the queue is the trace
/// counterpart of a wrapped-native log event, then drop that counterpart.
fn drain_until(
    internals: &mut VecDeque<InternalTransfer>,
    events: &mut Vec<TxEvent>,
    counterpart: InternalKind,
    log_index: u64,
    tx: &TxData,
) -> eyre::Result<()> {
    loop {
        let front = internals.pop_front().ok_or_else(|| {
            eyre!(
                "no internal transaction matches {:?} log {} of {}",
                counterpart,
                log_index,
                tx.hash
            )
        })?;
        if front.kind() == counterpart {
            return Ok(());
        }
        events.push(eth_transfer(front));
    }
}

fn eth_transfer(internal: InternalTransfer) -> TxEvent {
    TxEvent::EthTransfer {
        from: internal.from,
        to: internal.to,
        value: internal.value,
    }
}

fn gas_fee_event(tx: &TxData, receipt: &ReceiptData, miner: Address, base_fee: u128) -> TxEvent {
    let gas_used = U256::from(receipt.gas_used);
    let total = U256::from(receipt.effective_gas_price) * gas_used;
    let tip_per_gas = receipt.effective_gas_price.saturating_sub(base_fee);
    TxEvent::GasFee {
        sender: tx.from,
        miner,
        total,
        to_miner: U256::from(tip_per_gas) * gas_used,
    }
}
