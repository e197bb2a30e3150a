//! Property-based tests for settlement arithmetic, the booking status table
//! and the wallet ledger.
//!
//! These tests use proptest to check money conservation across a wide range
//! of totals, rates and deposit percentages, and that wallet balances always
//! match their ledger whatever sequence of mutations is applied.

mod common;

use common::TestMarket;
use decor_marketplace::{
    db,
    entities::{booking::BookingStatus, payment_transaction::TransactionType},
    services::{
        settlement::{
            compute_auto_cancel_compensation, compute_commission_split, compute_deposit_amount,
            compute_final_payment_amount,
        },
        wallet::PaymentReference,
    },
    ErrorCode,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use sea_orm::Iterable;

// Amounts in cents up to ten billion, always two decimal places.
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

// Commission rates with up to four decimal places in [0, 1].
fn rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|bp| Decimal::new(bp, 4))
}

fn percentage_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

#[derive(Debug, Clone)]
enum LedgerOp {
    TopUp(usize, Decimal),
    Debit(usize, Decimal),
    Transfer(usize, Decimal),
}

fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    // Whole currency units, as prices are quoted.
    let amount = || (1i64..500_000).prop_map(Decimal::from);
    prop_oneof![
        (0usize..2, amount()).prop_map(|(who, amt)| LedgerOp::TopUp(who, amt)),
        (0usize..2, amount()).prop_map(|(who, amt)| LedgerOp::Debit(who, amt)),
        (0usize..2, amount()).prop_map(|(from, amt)| LedgerOp::Transfer(from, amt)),
    ]
}

fn status_strategy() -> impl Strategy<Value = BookingStatus> {
    let all: Vec<BookingStatus> = BookingStatus::iter().collect();
    proptest::sample::select(all)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn commission_split_conserves_total(total in money_strategy(), rate in rate_strategy()) {
        let split = compute_commission_split(total, rate).unwrap();
        prop_assert_eq!(split.admin_amount + split.provider_amount, total);
        prop_assert!(split.admin_amount >= Decimal::ZERO);
        prop_assert!(split.provider_amount >= Decimal::ZERO);
        prop_assert!(split.admin_amount.scale() <= 2);
    }

    #[test]
    fn deposit_and_final_payment_add_up(total in money_strategy(), pct in percentage_strategy()) {
        let deposit = compute_deposit_amount(total, pct).unwrap();
        prop_assert!(deposit <= total);

        let remaining = compute_final_payment_amount(total, deposit).unwrap();
        prop_assert_eq!(deposit + remaining, total);
    }

    #[test]
    fn forfeited_deposit_is_fully_distributed(deposit in money_strategy(), rate in rate_strategy()) {
        let split = compute_auto_cancel_compensation(deposit, rate).unwrap();
        prop_assert_eq!(split.total(), deposit);
    }

    #[test]
    fn out_of_range_rates_are_rejected(total in money_strategy(), excess in 1i64..1_000_000) {
        let rate = Decimal::ONE + Decimal::new(excess, 4);
        prop_assert!(compute_commission_split(total, rate).is_err());
        prop_assert!(compute_commission_split(total, -Decimal::new(excess, 4)).is_err());
    }

    #[test]
    fn terminal_statuses_have_no_exits(from in status_strategy(), to in status_strategy()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    #[test]
    fn no_status_transitions_to_itself(status in status_strategy()) {
        prop_assert!(!status.can_transition_to(status));
    }
}

async fn apply_ledger_ops(ops: Vec<LedgerOp>) -> Result<(), TestCaseError> {
    let market = TestMarket::new().await;
    let accounts = [market.customer_id, market.provider_id];
    let mut expected = [Decimal::ZERO, Decimal::ZERO];

    for op in ops {
        match op {
            LedgerOp::TopUp(who, amount) => {
                market.wallets.top_up(accounts[who], amount).await.unwrap();
                expected[who] += amount;
            }
            LedgerOp::Debit(who, amount) => {
                let txn = db::begin(&market.db).await.unwrap();
                let result = market
                    .wallets
                    .debit(
                        &txn,
                        accounts[who],
                        amount,
                        TransactionType::OrderPay,
                        PaymentReference::None,
                    )
                    .await;
                match result {
                    Ok(_) => {
                        db::commit(txn).await.unwrap();
                        expected[who] -= amount;
                    }
                    Err(err) => {
                        prop_assert_eq!(err.code(), ErrorCode::InsufficientFunds);
                        prop_assert!(amount > expected[who]);
                    }
                }
            }
            LedgerOp::Transfer(from, amount) => {
                let to = 1 - from;
                let txn = db::begin(&market.db).await.unwrap();
                let result = market
                    .wallets
                    .transfer(
                        &txn,
                        accounts[from],
                        accounts[to],
                        amount,
                        TransactionType::OrderPay,
                        TransactionType::Payout,
                        PaymentReference::None,
                    )
                    .await;
                match result {
                    Ok(_) => {
                        db::commit(txn).await.unwrap();
                        expected[from] -= amount;
                        expected[to] += amount;
                    }
                    Err(err) => {
                        prop_assert_eq!(err.code(), ErrorCode::InsufficientFunds);
                        prop_assert!(amount > expected[from]);
                    }
                }
            }
        }

        for (who, account) in accounts.iter().enumerate() {
            let report = market.wallets.reconcile(*account).await.unwrap();
            prop_assert!(report.is_consistent());
            prop_assert!(report.balance >= Decimal::ZERO);
            prop_assert_eq!(report.balance, expected[who]);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn wallet_balance_always_matches_ledger(
        ops in proptest::collection::vec(ledger_op_strategy(), 1..20)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(apply_ledger_ops(ops))?;
    }
}
