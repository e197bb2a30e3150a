//! Wallet ledger behaviour: balances, overdraft protection and reconciliation.

mod common;

use assert_matches::assert_matches;
use common::TestMarket;
use decor_marketplace::{
    db,
    entities::payment_transaction::TransactionType,
    services::wallet::PaymentReference,
    ErrorCode, ServiceError,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn top_up_credits_balance_and_ledger() {
    let market = TestMarket::new().await;

    market.top_up(market.customer_id, dec!(150000)).await;
    market.top_up(market.customer_id, dec!(50000.50)).await;

    assert_eq!(market.balance(market.customer_id).await, dec!(200000.50));
    let report = market.wallets.reconcile(market.customer_id).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.ledger_sum, dec!(200000.50));
}

#[tokio::test]
async fn debit_beyond_balance_leaves_wallet_untouched() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(100)).await;

    let txn = db::begin(&market.db).await.unwrap();
    let result = market
        .wallets
        .debit(
            &txn,
            market.customer_id,
            dec!(100.01),
            TransactionType::OrderPay,
            PaymentReference::Order(7),
        )
        .await;
    drop(txn);

    let err = result.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    assert_matches!(
        err,
        ServiceError::InsufficientFunds { balance, requested, .. }
            if balance == dec!(100) && requested == dec!(100.01)
    );
    assert_eq!(market.balance(market.customer_id).await, dec!(100));
    assert!(market.payments_of_type(TransactionType::OrderPay).await.is_empty());
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let market = TestMarket::new().await;

    assert_matches!(
        market.wallets.top_up(market.customer_id, dec!(0)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        market.wallets.top_up(market.customer_id, dec!(-5)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(market.balance(market.customer_id).await, dec!(0));
}

#[tokio::test]
async fn balance_overflow_is_an_error_not_a_panic() {
    let market = TestMarket::new().await;
    let huge = dec!(50000000000000000000000000000);
    market.wallets.top_up(market.customer_id, huge).await.unwrap();

    let err = market
        .wallets
        .top_up(market.customer_id, huge)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(market.payments_of_type(TransactionType::TopUp).await.len(), 1);
}

#[tokio::test]
async fn transfer_moves_funds_atomically() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(500)).await;

    let txn = db::begin(&market.db).await.unwrap();
    market
        .wallets
        .transfer(
            &txn,
            market.customer_id,
            market.provider_id,
            dec!(200),
            TransactionType::OrderPay,
            TransactionType::Payout,
            PaymentReference::Order(1),
        )
        .await
        .unwrap();
    db::commit(txn).await.unwrap();

    assert_eq!(market.balance(market.customer_id).await, dec!(300));
    assert_eq!(market.balance(market.provider_id).await, dec!(200));

    // A failed debit never reaches the credit side.
    let txn = db::begin(&market.db).await.unwrap();
    let failed = market
        .wallets
        .transfer(
            &txn,
            market.customer_id,
            market.provider_id,
            dec!(1000),
            TransactionType::OrderPay,
            TransactionType::Payout,
            PaymentReference::Order(2),
        )
        .await;
    drop(txn);
    assert_matches!(failed, Err(ServiceError::InsufficientFunds { .. }));
    assert_eq!(market.balance(market.customer_id).await, dec!(300));
    assert_eq!(market.balance(market.provider_id).await, dec!(200));

    for account in [market.customer_id, market.provider_id] {
        assert!(market.wallets.reconcile(account).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn rolled_back_credit_is_not_visible() {
    let market = TestMarket::new().await;

    let txn = db::begin(&market.db).await.unwrap();
    market
        .wallets
        .credit(
            &txn,
            market.provider_id,
            dec!(42),
            TransactionType::Payout,
            PaymentReference::Order(3),
        )
        .await
        .unwrap();
    drop(txn);

    assert_eq!(market.balance(market.provider_id).await, dec!(0));
    assert!(market.payments_of_type(TransactionType::Payout).await.is_empty());
}

#[tokio::test]
async fn second_wallet_for_account_conflicts() {
    let market = TestMarket::new().await;

    let err = market.wallets.open_wallet(market.customer_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
}

#[tokio::test]
async fn unknown_wallet_is_not_found() {
    let market = TestMarket::new().await;

    assert_matches!(
        market.wallets.balance(9999).await,
        Err(ServiceError::NotFound(_))
    );
}
