// Policy-level scenarios: each taint-transfer rule exercised directly against
// a scripted chain and a fresh block ledger.

mod common;

use alloy_primitives::U256;
use common::{MockChain, AAA, BBB, MINER, TOKEN};
use taint_tracker::ledger::TempLedger;
use taint_tracker::types::Currency;
use taint_tracker::{PolicyKind, TaintPolicy, NULL_ADDRESS, WETH};

fn u(v: u64) -> U256 {
    U256::from(v)
}

const BLOCK: u64 = 100;

// ── Poison ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn poison_marks_receiver_of_tainted_send() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Poison);
    let mut ledger = TempLedger::new();
    policy.store_mut().add_account(AAA);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(1_000_000_000_000_000_000),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(1));
    assert!(policy.store().is_blacklisted(BBB, None));
}

#[tokio::test]
async fn poison_never_marks_the_null_address() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Poison);
    let mut ledger = TempLedger::new();
    policy.store_mut().add_account(AAA);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(NULL_ADDRESS),
            u(5),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, U256::ZERO);
    assert!(!policy.store().is_blacklisted(NULL_ADDRESS, None));
}

#[tokio::test]
async fn poison_fee_marks_the_miner() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Poison);
    let mut ledger = TempLedger::new();
    policy.store_mut().add_account(AAA);

    policy
        .process_gas_fee(&chain, &mut ledger, BLOCK, AAA, MINER, u(100), u(40))
        .await
        .unwrap();

    assert!(policy.store().is_blacklisted(MINER, None));
}

// ── Haircut ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn haircut_splits_proportionally() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 40);
    let mut policy = TaintPolicy::new(PolicyKind::Haircut);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    // taint 10 of balance 40; sending 20 moves a quarter of the send
    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(20),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(5));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(5));
    assert_eq!(policy.store().value(BBB, Currency::Eth), u(5));
}

#[tokio::test]
async fn haircut_zero_send_changes_nothing() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 40);
    let mut policy = TaintPolicy::new(PolicyKind::Haircut);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            U256::ZERO,
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, U256::ZERO);
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(10));
    assert!(!policy.store().is_blacklisted(BBB, None));
}

#[tokio::test]
async fn haircut_burn_destroys_the_share() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 10);
    let mut policy = TaintPolicy::new(PolicyKind::Haircut);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    // fully tainted balance, burning 4 burns 4 taint
    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(NULL_ADDRESS),
            u(4),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(4));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(6));
    assert!(!policy.store().is_blacklisted(NULL_ADDRESS, None));
}

#[tokio::test]
async fn haircut_fee_taints_miner_share() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 100);
    let mut policy = TaintPolicy::new(PolicyKind::Haircut);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(50), None);

    // half the balance is tainted: fee 10 removes 5, miner share 4 credits 2
    let (removed, credited) = policy
        .process_gas_fee(&chain, &mut ledger, BLOCK, AAA, MINER, u(10), u(4))
        .await
        .unwrap();

    assert_eq!(removed, u(5));
    assert_eq!(credited, u(2));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(45));
    assert_eq!(policy.store().value(MINER, Currency::Eth), u(2));
}

// ── Seniority ────────────────────────────────────────────────────────────

#[tokio::test]
async fn seniority_moves_oldest_taint_first() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(3), None);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(10),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(3));
    assert!(!policy.store().is_blacklisted(AAA, None));
    assert_eq!(policy.store().value(BBB, Currency::Eth), u(3));
}

#[tokio::test]
async fn seniority_fee_uses_pre_debit_taint_for_both_shares() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(3), None);

    // total fee 5 caps at taint 3; the miner share 2 is judged against the
    // same taint of 3, not against what remains after the removal
    let (removed, credited) = policy
        .process_gas_fee(&chain, &mut ledger, BLOCK, AAA, MINER, u(5), u(2))
        .await
        .unwrap();

    assert_eq!(removed, u(3));
    assert_eq!(credited, u(2));
    assert!(!policy.store().is_blacklisted(AAA, None));
    assert_eq!(policy.store().value(MINER, Currency::Eth), u(2));
}

#[tokio::test]
async fn seniority_wrap_converts_taint_currency() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(5), None);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(AAA),
            u(2),
            Currency::Eth,
            Currency::WRAPPED_NATIVE,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(2));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(3));
    assert_eq!(policy.store().value(AAA, Currency::WRAPPED_NATIVE), u(2));
}

#[tokio::test]
async fn permanent_taint_sends_full_amount_without_draining() {
    let chain = MockChain::default();
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(1), None);
    policy.permanently_taint(AAA);

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(500),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(500));
    // the spring is not drained
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(1));
    assert_eq!(policy.store().value(BBB, Currency::Eth), u(500));
}

// ── Reversed Seniority ───────────────────────────────────────────────────

#[tokio::test]
async fn reversed_seniority_shielded_send_moves_nothing() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 100);
    let mut policy = TaintPolicy::new(PolicyKind::ReversedSeniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    // balance 100, taint 10: a send of 20 leaves 80 behind, which still
    // covers the taint
    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(20),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, U256::ZERO);
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(10));
    assert!(!policy.store().is_blacklisted(BBB, None));
}

#[tokio::test]
async fn reversed_seniority_deep_send_moves_the_exposed_tail() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 12);
    let mut policy = TaintPolicy::new(PolicyKind::ReversedSeniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    // sending 5 of 12 leaves 7, exposing 3 of the 10 tainted
    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(5),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, u(3));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(7));
    assert_eq!(policy.store().value(BBB, Currency::Eth), u(3));
}

#[tokio::test]
async fn reversed_seniority_fee_caps_miner_share_at_tainted_fee() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 10);
    let mut policy = TaintPolicy::new(PolicyKind::ReversedSeniority);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), None);

    // fully tainted balance: fee 6 is all tainted, miner gets min(8, 6)
    let (removed, credited) = policy
        .process_gas_fee(&chain, &mut ledger, BLOCK, AAA, MINER, u(6), u(8))
        .await
        .unwrap();

    assert_eq!(removed, u(6));
    assert_eq!(credited, u(6));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(4));
}

// ── FIFO ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fifo_partial_consumption_preserves_total_taint() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 16); // equals the tracked inflows
    let mut policy = TaintPolicy::new(PolicyKind::Fifo);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(4), Some(u(10)));
    policy.store_mut().add(AAA, Currency::Eth, u(6), Some(u(6)));

    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(7),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    // the head pair [4,10] shrinks to [3,3]; 1 unit of taint moved
    assert_eq!(moved, u(1));
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(9));
    // the receiver records the gross send as one inflow
    assert_eq!(policy.store().value(BBB, Currency::Eth), u(1));
    assert_eq!(policy.store().tracked_value(BBB, Currency::Eth), u(7));
    // taint is conserved: 1 + 3 + 6 = 10
    let total = policy.store().value(AAA, Currency::Eth) + policy.store().value(BBB, Currency::Eth);
    assert_eq!(total, u(10));
}

#[tokio::test]
async fn fifo_untracked_balance_leaves_first() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 20); // 4 more than the tracked 16
    let mut policy = TaintPolicy::new(PolicyKind::Fifo);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(4), Some(u(10)));
    policy.store_mut().add(AAA, Currency::Eth, u(6), Some(u(6)));

    // a send of 3 fits entirely in the untracked slice
    let moved = policy
        .transfer_taint(
            &chain,
            &mut ledger,
            BLOCK,
            AAA,
            Some(BBB),
            u(3),
            Currency::Eth,
            Currency::Eth,
        )
        .await
        .unwrap();

    assert_eq!(moved, U256::ZERO);
    assert_eq!(policy.store().value(AAA, Currency::Eth), u(10));
    assert!(!policy.store().is_blacklisted(BBB, None));
}

#[tokio::test]
async fn fifo_fee_burn_consumes_queue_without_a_receiver() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 10);
    let mut policy = TaintPolicy::new(PolicyKind::Fifo);
    let mut ledger = TempLedger::new();
    policy.store_mut().add(AAA, Currency::Eth, u(10), Some(u(10)));

    // fee 10, of which 4 to the miner; the burned 6 moves taint nowhere
    let (removed, credited) = policy
        .process_gas_fee(&chain, &mut ledger, BLOCK, AAA, MINER, u(10), u(4))
        .await
        .unwrap();

    assert_eq!(removed, u(10));
    assert_eq!(credited, u(4));
    assert_eq!(policy.store().value(MINER, Currency::Eth), u(4));
    assert!(!policy.store().is_blacklisted(AAA, None));
}

// ── Full-tainting of tokens ──────────────────────────────────────────────

#[tokio::test]
async fn seed_snapshots_eth_and_wrapped_native() {
    let mut chain = MockChain::default();
    chain.set_eth_balance(AAA, 70);
    chain.set_token_balance(WETH, AAA, 30);
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);

    policy.seed_account(&chain, AAA, BLOCK).await.unwrap();

    assert_eq!(policy.store().value(AAA, Currency::Eth), u(70));
    assert_eq!(policy.store().value(AAA, Currency::WRAPPED_NATIVE), u(30));
    // wrapped native is recorded as already snapshotted
    assert!(policy.store().is_fully_tainted(AAA, WETH));
}

#[tokio::test]
async fn full_taint_happens_once_per_token() {
    let mut chain = MockChain::default();
    chain.set_token_balance(TOKEN, AAA, 55);
    let mut policy = TaintPolicy::new(PolicyKind::Seniority);
    policy.seed_account(&chain, AAA, BLOCK).await.unwrap();

    policy
        .fully_taint_token(&chain, AAA, TOKEN, BLOCK)
        .await
        .unwrap();
    assert_eq!(policy.store().value(AAA, Currency::Token(TOKEN)), u(55));

    // the balance moved on chain; a second call must not re-snapshot
    chain.set_token_balance(TOKEN, AAA, 1_000);
    policy
        .fully_taint_token(&chain, AAA, TOKEN, BLOCK)
        .await
        .unwrap();
    assert_eq!(policy.store().value(AAA, Currency::Token(TOKEN)), u(55));
}
