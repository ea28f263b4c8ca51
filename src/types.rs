// Core identifiers and the canonical value-movement event types.
//
// Everything the engine moves around is expressed with these types; raw RPC
// shapes never leave the chain adapter.

use alloy_primitives::{address, Address, U256, U512};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Canonical wrapped-native token contract.
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

/// Mint/burn endpoint. Must never end up holding taint.
pub const NULL_ADDRESS: Address = Address::ZERO;

/// A currency is either native ETH or an ERC20-like token contract.
///
/// Wrapped native is a token like any other; `Deposit`/`Withdrawal` events
/// are the only place the two sides meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Currency {
    Eth,
    Token(Address),
}

impl Currency {
    /// The wrapped-native token as a currency.
    pub const WRAPPED_NATIVE: Currency = Currency::Token(WETH);

    pub fn is_native(&self) -> bool {
        matches!(self, Currency::Eth)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Eth => f.write_str("ETH"),
            Currency::Token(addr) => f.write_str(&addr.to_checksum(None)),
        }
    }
}

impl FromStr for Currency {
    type Err = <Address as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ETH" {
            Ok(Currency::Eth)
        } else {
            s.parse::<Address>().map(Currency::Token)
        }
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// One value movement inside a transaction, in canonical processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// ERC20-like Transfer log.
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    /// Wrapped-native Deposit log: `dst` wraps `wad` native units.
    Deposit {
        token: Address,
        dst: Address,
        wad: U256,
    },
    /// Wrapped-native Withdrawal log: `src` unwraps `wad` units.
    Withdrawal {
        token: Address,
        src: Address,
        wad: U256,
    },
    /// Native transfer observed in the trace stream (outer send or internal call).
    EthTransfer {
        from: Address,
        to: Address,
        value: U256,
    },
    /// Fee paid by the transaction sender. `to_miner` is the tip portion;
    /// the remainder is burned.
    GasFee {
        sender: Address,
        miner: Address,
        total: U256,
        to_miner: U256,
    },
}

/// A nonzero-value internal call surviving revert filtering, in trace order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// How an internal transfer relates to the wrapped-native contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalKind {
    /// Plain ETH movement between accounts.
    Plain,
    /// ETH sent into the wrapped-native contract (counterpart of a Deposit log).
    Deposit,
    /// ETH paid out of the wrapped-native contract (counterpart of a Withdrawal log).
    Withdrawal,
}

impl InternalTransfer {
    pub fn kind(&self) -> InternalKind {
        if self.to == WETH {
            InternalKind::Deposit
        } else if self.from == WETH {
            InternalKind::Withdrawal
        } else {
            InternalKind::Plain
        }
    }
}

/// Floor of `amount * numerator / denominator` over a 512-bit intermediate,
/// clamped to `amount` so rounding can never inflate the result.
///
/// `denominator` must be nonzero.
pub fn mul_div_clamped(amount: U256, numerator: U256, denominator: U256) -> U256 {
    debug_assert!(!denominator.is_zero());
    let q = U512::from(amount) * U512::from(numerator) / U512::from(denominator);
    if q >= U512::from(amount) {
        amount
    } else {
        q.to::<U256>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_display_roundtrip() {
        assert_eq!(Currency::Eth.to_string(), "ETH");
        assert_eq!("ETH".parse::<Currency>().unwrap(), Currency::Eth);

        let weth = Currency::Token(WETH);
        let s = weth.to_string();
        assert_eq!(s, "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        assert_eq!(s.parse::<Currency>().unwrap(), weth);
    }

    #[test]
    fn internal_kind_classification() {
        let other = address!("00000000000000000000000000000000000000aa");
        let deposit = InternalTransfer {
            from: other,
            to: WETH,
            value: U256::from(1u64),
        };
        assert_eq!(deposit.kind(), InternalKind::Deposit);

        let withdrawal = InternalTransfer {
            from: WETH,
            to: other,
            value: U256::from(1u64),
        };
        assert_eq!(withdrawal.kind(), InternalKind::Withdrawal);

        let plain = InternalTransfer {
            from: other,
            to: other,
            value: U256::from(1u64),
        };
        assert_eq!(plain.kind(), InternalKind::Plain);
    }

    #[test]
    fn mul_div_floor_division() {
        // 20 * 10 / 40 = 5
        assert_eq!(
            mul_div_clamped(U256::from(20u64), U256::from(10u64), U256::from(40u64)),
            U256::from(5u64)
        );
        // 7 * 1 / 3 = 2 (floor)
        assert_eq!(
            mul_div_clamped(U256::from(7u64), U256::from(1u64), U256::from(3u64)),
            U256::from(2u64)
        );
    }

    #[test]
    fn mul_div_survives_huge_operands() {
        // The product overflows 256 bits; the quotient must still be exact.
        let amount = U256::MAX / U256::from(2u64);
        let out = mul_div_clamped(amount, amount, U256::MAX);
        assert!(out < amount);
        assert!(out > U256::ZERO);
    }

    #[test]
    fn mul_div_clamps_to_amount() {
        // Numerator above denominator would round past the sent amount.
        assert_eq!(
            mul_div_clamped(U256::from(10u64), U256::from(30u64), U256::from(20u64)),
            U256::from(10u64)
        );
    }
}
