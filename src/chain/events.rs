//! Receipt-log decoding for the three value-movement event kinds.
//!
//! Only `Transfer`, `Deposit` and `Withdrawal` logs are meaningful to the
//! engine; every other topic is dropped without comment. ERC721 also emits
//! `Transfer(address,address,uint256)` but with the tokenId indexed (4 topics
//! vs 3), so alloy's decoder rejects those automatically.

use alloy_primitives::{Address, Log, U256};
use alloy_sol_types::{sol, SolEvent};

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[derive(Debug)]
    event Deposit(address indexed dst, uint256 wad);

    #[derive(Debug)]
    event Withdrawal(address indexed src, uint256 wad);
}

/// A decoded receipt-log event with its position in the receipt preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub log_index: u64,
    pub kind: LogEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEventKind {
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Deposit {
        token: Address,
        dst: Address,
        wad: U256,
    },
    Withdrawal {
        token: Address,
        src: Address,
        wad: U256,
    },
}

/// Decode a raw log as Transfer/Deposit/Withdrawal, matching on topic0.
/// Returns None for any other topic or a malformed body.
pub fn decode_log(log: &Log, log_index: u64) -> Option<LogEvent> {
    let topic0 = log.topics().first()?;

    let kind = if topic0.0 == Transfer::SIGNATURE_HASH.0 {
        let decoded = Transfer::decode_log(log).ok()?;
        LogEventKind::Transfer {
            token: log.address,
            from: decoded.data.from,
            to: decoded.data.to,
            value: decoded.data.value,
        }
    } else if topic0.0 == Deposit::SIGNATURE_HASH.0 {
        let decoded = Deposit::decode_log(log).ok()?;
        LogEventKind::Deposit {
            token: log.address,
            dst: decoded.data.dst,
            wad: decoded.data.wad,
        }
    } else if topic0.0 == Withdrawal::SIGNATURE_HASH.0 {
        let decoded = Withdrawal::decode_log(log).ok()?;
        LogEventKind::Withdrawal {
            token: log.address,
            src: decoded.data.src,
            wad: decoded.data.wad,
        }
    } else {
        return None;
    };

    Some(LogEvent { log_index, kind })
}
